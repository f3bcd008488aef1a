//! Concurrent bookkeeping of operations awaiting an asynchronous outcome
//!
//! An operation is registered under an opaque token before the message that triggers its
//! outcome is sent. The outcome arrives later on a different execution context (the delivery
//! loop of a reply consumer or a confirm listener) which resolves the token. In the meantime
//! the caller may give up waiting (timeout) or withdraw (cancellation).
//!
//! All of these race each other. The [`PendingOperationTable`] guarantees that exactly one of
//! them wins: removing the entry from the table is the exclusive claim to settle it and every
//! later attempt finds nothing and becomes a no-op. Late or duplicate broker events are thus
//! harmless.

mod handle;
mod table;

pub use handle::*;
pub use table::*;

use thiserror::Error;

/// Terminal state of a pending operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<V> {
    /// A matching event arrived and carried a value
    Resolved(V),
    /// The caller withdrew before an event arrived
    Cancelled,
    /// No event arrived before the deadline
    TimedOut,
    /// The transport carrying the events went away
    TransportClosed,
}

impl<V> Resolution<V> {
    /// Returns the resolved value, if any
    pub fn value(self) -> Option<V> {
        match self {
            Resolution::Resolved(value) => Some(value),
            _ => None,
        }
    }

    /// Whether the operation received a value
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }
}

/// Precondition violations reported by the [`PendingOperationTable`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    /// The token is already registered and has not been settled yet
    #[error("token {0} is already pending")]
    DuplicateToken(String),
}
