use super::Resolution;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

/// Receiving end of a pending operation, handed out on registration
///
/// Awaiting the handle directly waits indefinitely. Use
/// [`PendingOperationTable::wait`](super::PendingOperationTable::wait) to bound the wait
/// with a deadline or a cancellation token.
#[derive(Debug)]
pub struct PendingHandle<T, V> {
    pub(super) token: T,
    pub(super) receiver: oneshot::Receiver<Resolution<V>>,
}

impl<T, V> PendingHandle<T, V> {
    /// Token under which the operation has been registered
    pub fn token(&self) -> &T {
        &self.token
    }

    /// Waits for the operation to be settled without any deadline
    ///
    /// Returns [`Resolution::TransportClosed`] if the table was dropped in the meantime.
    pub async fn wait(self) -> Resolution<V> {
        self.receiver
            .await
            .unwrap_or(Resolution::TransportClosed)
    }
}

/// Entry that has been removed from the table and awaits settlement
///
/// Holding a claim is the exclusive right to settle an operation. Whoever removed it from
/// the table won the race against any concurrent timeout, cancellation or event delivery.
/// Dropping a claim without settling it reports [`Resolution::TransportClosed`] to the waiter.
#[derive(Debug)]
pub struct Claim<T, V, C> {
    pub(super) token: T,
    pub(super) context: C,
    pub(super) created_at: DateTime<Utc>,
    pub(super) slot: oneshot::Sender<Resolution<V>>,
}

impl<T, V, C> Claim<T, V, C> {
    /// Token of the claimed operation
    pub fn token(&self) -> &T {
        &self.token
    }

    /// Context that has been attached on registration
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Point in time at which the operation has been registered
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Delivers the resolution to the waiting party and returns the context
    ///
    /// A waiter that has already gone away is not an error, the resolution is discarded.
    pub fn settle(self, resolution: Resolution<V>) -> C {
        self.slot.send(resolution).ok();
        self.context
    }
}
