//! Capabilities required from the message broker
//!
//! The broker is an external collaborator. This module only describes what is expected of it:
//!
//! - Publishing a [`Message`] with an opaque body, a correlation id, a reply address and a
//!   persistence flag to a named destination.
//! - Declaring a private, broker-named reply queue.
//! - Consuming a queue with explicit acknowledgement of each [`Delivery`] and a bounded number
//!   of unacknowledged deliveries in flight (prefetch).
//! - Enabling publisher confirms on a [`Channel`], after which each publish is assigned a
//!   strictly increasing sequence number and the broker emits a stream of [`ConfirmEvents`](ConfirmEvent).

mod channel;
mod confirm;
mod delivery;
mod message;

pub use channel::*;
pub use confirm::*;
pub use delivery::*;
pub use message::*;
