use super::{Claim, PendingHandle, Resolution, TableError};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Interval at which [`PendingOperationTable::wait_until_empty`] re-checks the table
/// in case a wake-up got lost
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct PendingEntry<V, C> {
    slot: oneshot::Sender<Resolution<V>>,
    context: C,
    created_at: DateTime<Utc>,
}

/// Point-in-time view of a pending operation
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSnapshot<T, C> {
    /// Token of the operation
    pub token: T,
    /// Context attached on registration
    pub context: C,
    /// Point in time at which the operation has been registered
    pub created_at: DateTime<Utc>,
}

/// Concurrent map from an opaque token to a single-resolution result slot
///
/// Entries are kept ordered by token so that cumulative events ("everything up to and
/// including `S`") can be applied in numeric order regardless of the order in which they
/// were registered. Every operation only holds an internal lock for the duration of the map
/// access and is thus safe to call from any execution context, including the delivery loops
/// of broker event streams.
///
/// Each entry may carry a context of type `C` which is handed back to whoever settles it
/// (e.g. a reference to the published message for reporting purposes).
pub struct PendingOperationTable<T, V, C = ()> {
    entries: Mutex<BTreeMap<T, PendingEntry<V, C>>>,
    drained: Notify,
}

impl<T, V, C> Default for PendingOperationTable<T, V, C>
where
    T: Ord + Clone + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, V, C> PendingOperationTable<T, V, C>
where
    T: Ord + Clone + Debug,
{
    /// Creates a new, empty table
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            drained: Notify::new(),
        }
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<T, PendingEntry<V, C>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new pending operation and returns a handle to await its resolution
    ///
    /// Fails with [`TableError::DuplicateToken`] if the token is still pending.
    pub fn register(&self, token: T, context: C) -> Result<PendingHandle<T, V>, TableError> {
        let mut entries = self.entries();

        if entries.contains_key(&token) {
            return Err(TableError::DuplicateToken(format!("{:?}", token)));
        }

        let (slot, receiver) = oneshot::channel();
        entries.insert(
            token.clone(),
            PendingEntry {
                slot,
                context,
                created_at: Utc::now(),
            },
        );

        trace!(?token, pending = entries.len(), "Registered operation");

        Ok(PendingHandle { token, receiver })
    }

    /// Removes a single entry, granting the exclusive right to settle it
    pub fn claim(&self, token: &T) -> Option<Claim<T, V, C>> {
        let mut entries = self.entries();
        let entry = entries.remove(token);
        let now_empty = entries.is_empty();
        drop(entries);

        let claim = entry.map(|entry| Claim {
            token: token.clone(),
            context: entry.context,
            created_at: entry.created_at,
            slot: entry.slot,
        });

        if claim.is_some() && now_empty {
            self.drained.notify_waiters();
        }

        claim
    }

    /// Removes every entry with a token less than or equal to `upper`, in ascending order
    pub fn claim_through(&self, upper: &T) -> Vec<Claim<T, V, C>> {
        let mut entries = self.entries();
        let tokens: Vec<T> = entries.range(..=upper).map(|(t, _)| t.clone()).collect();
        let claims = tokens
            .into_iter()
            .filter_map(|token| {
                entries.remove(&token).map(|entry| Claim {
                    token,
                    context: entry.context,
                    created_at: entry.created_at,
                    slot: entry.slot,
                })
            })
            .collect::<Vec<_>>();
        let now_empty = entries.is_empty();
        drop(entries);

        if !claims.is_empty() && now_empty {
            self.drained.notify_waiters();
        }

        claims
    }

    /// Removes every entry, in ascending order
    pub fn claim_all(&self) -> Vec<Claim<T, V, C>> {
        let drained = std::mem::take(&mut *self.entries());

        let claims: Vec<_> = drained
            .into_iter()
            .map(|(token, entry)| Claim {
                token,
                context: entry.context,
                created_at: entry.created_at,
                slot: entry.slot,
            })
            .collect();

        if !claims.is_empty() {
            self.drained.notify_waiters();
        }

        claims
    }

    /// Returns a guard which cancels the operation once dropped
    ///
    /// Ties an operation to the future awaiting it: if that future is dropped before the
    /// operation settled (an outer timeout, a `select!` or an aborted task), the entry is
    /// cancelled instead of staying in the table forever.
    pub fn cancel_on_drop(&self, token: T) -> CancelOnDrop<'_, T, V, C> {
        CancelOnDrop {
            table: self,
            token: Some(token),
        }
    }

    fn settle(&self, token: &T, resolution: Resolution<V>) -> bool {
        match self.claim(token) {
            Some(claim) => {
                claim.settle(resolution);
                true
            }
            None => false,
        }
    }

    /// Resolves a pending operation with a value
    ///
    /// Returns whether a matching entry existed. Resolving a missing token is a no-op.
    pub fn resolve(&self, token: &T, value: V) -> bool {
        self.settle(token, Resolution::Resolved(value))
    }

    /// Cancels a pending operation without a value
    ///
    /// Returns whether a matching entry existed.
    pub fn cancel(&self, token: &T) -> bool {
        self.settle(token, Resolution::Cancelled)
    }

    /// Marks a pending operation as timed out
    ///
    /// Returns whether a matching entry existed.
    pub fn expire(&self, token: &T) -> bool {
        self.settle(token, Resolution::TimedOut)
    }

    /// Fails every pending operation because the underlying transport is gone
    ///
    /// Returns the number of operations that have been failed.
    pub fn fail_all(&self) -> usize {
        let claims = self.claim_all();
        let count = claims.len();

        for claim in claims {
            claim.settle(Resolution::TransportClosed);
        }

        count
    }

    /// Number of operations currently pending
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether no operation is pending
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Whether the given token is currently pending
    pub fn contains(&self, token: &T) -> bool {
        self.entries().contains_key(token)
    }

    /// Tokens currently pending in ascending order
    pub fn tokens(&self) -> Vec<T> {
        self.entries().keys().cloned().collect()
    }

    /// Waits until the operation behind the handle has been settled
    ///
    /// Dropping the returned future before it completes cancels the operation.
    ///
    /// When the optional `deadline` elapses the entry is expired, when the optional
    /// `cancellation` token fires it is cancelled. If an event wins the race against either of
    /// them, its resolution is returned instead since the expiry or cancellation then finds no
    /// entry and becomes a no-op.
    pub async fn wait(
        &self,
        handle: PendingHandle<T, V>,
        deadline: Option<Duration>,
        cancellation: Option<&CancellationToken>,
    ) -> Resolution<V> {
        let PendingHandle {
            token,
            mut receiver,
        } = handle;

        // Settled operations are no longer in the table, cancelling them is a no-op
        let _abandoned = self.cancel_on_drop(token.clone());

        let expiry = async {
            match deadline {
                Some(duration) => sleep(duration).await,
                None => future::pending::<()>().await,
            }
        };

        let cancelled = async {
            match cancellation {
                Some(token) => token.cancelled().await,
                None => future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            resolution = &mut receiver => {
                return resolution.unwrap_or(Resolution::TransportClosed);
            }
            _ = expiry => {
                if self.expire(&token) {
                    trace!(?token, "Operation expired");
                }
            }
            _ = cancelled => {
                if self.cancel(&token) {
                    trace!(?token, "Operation cancelled");
                }
            }
        }

        // Either we settled it ourselves or somebody else claimed it first and is about to
        receiver.await.unwrap_or(Resolution::TransportClosed)
    }

    /// Waits until the table is empty or the deadline elapses
    ///
    /// Returns whether the table has been drained. Entries which are still pending
    /// on timeout are left in place for inspection.
    pub async fn wait_until_empty(&self, deadline: Duration) -> bool {
        let deadline = Instant::now() + deadline;

        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_empty() {
                return true;
            }

            let wake = timeout(DRAIN_POLL_INTERVAL, notified);
            if timeout_at(deadline, wake).await.is_err() {
                return self.is_empty();
            }
        }
    }
}

impl<T, V, C> PendingOperationTable<T, V, C>
where
    T: Ord + Clone + Debug,
    C: Clone,
{
    /// Point-in-time view of all pending operations in ascending token order
    pub fn snapshot(&self) -> Vec<PendingSnapshot<T, C>> {
        self.entries()
            .iter()
            .map(|(token, entry)| PendingSnapshot {
                token: token.clone(),
                context: entry.context.clone(),
                created_at: entry.created_at,
            })
            .collect()
    }
}

/// Guard returned by [`PendingOperationTable::cancel_on_drop`]
pub struct CancelOnDrop<'a, T, V, C>
where
    T: Ord + Clone + Debug,
{
    table: &'a PendingOperationTable<T, V, C>,
    token: Option<T>,
}

impl<'a, T, V, C> CancelOnDrop<'a, T, V, C>
where
    T: Ord + Clone + Debug,
{
    /// Keeps the operation pending when the guard goes away
    pub fn disarm(mut self) {
        self.token = None;
    }
}

impl<'a, T, V, C> Drop for CancelOnDrop<'a, T, V, C>
where
    T: Ord + Clone + Debug,
{
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if self.table.cancel(&token) {
                trace!(?token, "Operation abandoned");
            }
        }
    }
}
