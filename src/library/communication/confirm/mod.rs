//! Structures to learn whether the broker accepted each publish
//!
//! Once confirms are enabled on a [`Channel`](super::broker::Channel), every publish is assigned
//! a sequence number and the broker eventually acknowledges or rejects it through an asynchronous
//! stream of [`ConfirmEvents`](super::broker::ConfirmEvent). The [`ConfirmTracker`] records each
//! publish before it is sent and settles it when the matching event arrives, honouring events
//! which cover every publish up to a given sequence number.
//!
//! On top of it, the [`ConfirmedPublisher`] implements the three ways a producer may wait for
//! its confirms, selected by a [`PublishStrategy`]:
//!
//! - [`Individual`](PublishStrategy::Individual) waits after every publish
//! - [`Batched`](PublishStrategy::Batched) waits after every batch of publishes
//! - [`FullyAsync`](PublishStrategy::FullyAsync) never waits while publishing and only drains
//!   the tracker at the very end
//!
//! Rejected publishes are never retried here. They are handed to a [`NackHandler`] which decides
//! what happens to them.

mod nack;
mod publisher;
mod tracker;

pub use nack::*;
pub use publisher::*;
pub use tracker::*;

use super::broker::{SequenceNumber, TransportError};
use super::pending::TableError;
use thiserror::Error;

/// Errors raised while publishing with confirms
#[derive(Error, Debug)]
pub enum ConfirmError {
    /// The channel has not been put into confirm mode
    #[error("publisher confirms are not enabled on the channel")]
    ConfirmsDisabled,
    /// The channel assigned a different sequence number than announced
    #[error("broker assigned sequence number {assigned:?} instead of {expected}")]
    SequenceMismatch {
        /// Sequence number announced before publishing
        expected: SequenceNumber,
        /// Sequence number actually assigned
        assigned: Option<SequenceNumber>,
    },
    /// Confirms did not arrive before the deadline
    #[error("{outstanding} publishes remained unconfirmed after the deadline")]
    Timeout {
        /// Number of publishes still awaiting a confirm
        outstanding: usize,
    },
    /// The broker negatively acknowledged a publish
    #[error("broker rejected publish {sequence}")]
    BrokerRejected {
        /// Sequence number of the rejected publish
        sequence: SequenceNumber,
    },
    /// The confirm stream ended while publishes were outstanding
    #[error("transport closed with publishes outstanding")]
    TransportClosed,
    /// Communication with the broker failed
    #[error("communication with the broker failed")]
    Transport(#[source] TransportError),
    /// The publish could not be tracked
    #[error("unable to track publish")]
    Table(#[from] TableError),
}
