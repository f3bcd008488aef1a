use super::{LogNacks, NackHandler};
use crate::library::communication::broker::{ConfirmEvent, ConfirmKind, SequenceNumber};
use crate::library::communication::pending::{
    CancelOnDrop, Claim, PendingHandle, PendingOperationTable, Resolution, TableError,
};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Lifecycle of a tracked publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmState {
    /// Published but not yet confirmed
    Pending,
    /// Accepted by the broker
    Acked,
    /// Rejected by the broker
    Nacked,
}

/// Publish as seen by the [`ConfirmTracker`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmEntry<R> {
    /// Sequence number assigned by the channel
    pub sequence: SequenceNumber,
    /// Reference to the published message, used for reporting
    pub message_ref: R,
    /// Current state
    pub state: ConfirmState,
}

/// Handle through which the publisher learns the fate of a single publish
pub type ConfirmHandle = PendingHandle<SequenceNumber, ConfirmState>;

/// Running totals of confirms applied by a [`ConfirmTracker`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmStats {
    /// Number of publishes the broker accepted
    pub acked: usize,
    /// Number of publishes the broker rejected
    pub nacked: usize,
}

/// Correlates confirm events with outstanding publishes
///
/// Publishes have to be tracked **before** they are handed to the channel. Otherwise a fast
/// broker may confirm a sequence number the tracker has never heard of, and the confirm would
/// be lost. Events for unknown sequence numbers (duplicates, late arrivals) are ignored.
///
/// Entries have no deadline of their own. They leave the tracker through an ack, a nack or
/// the loss of the confirm stream; an indefinitely pending publish is detected by
/// [`drain`](ConfirmTracker::drain) timing out.
pub struct ConfirmTracker<R> {
    table: PendingOperationTable<SequenceNumber, ConfirmState, R>,
    nacks: Box<dyn NackHandler<R>>,
    acked: AtomicUsize,
    nacked: AtomicUsize,
}

impl<R: Debug + Send + 'static> Default for ConfirmTracker<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Debug + Send + 'static> ConfirmTracker<R> {
    /// Creates a tracker that logs rejected publishes
    pub fn new() -> Self {
        Self::with_nack_handler(LogNacks)
    }
}

impl<R> ConfirmTracker<R> {
    /// Creates a tracker which reports rejected publishes to the given handler
    pub fn with_nack_handler(handler: impl NackHandler<R> + 'static) -> Self {
        Self {
            table: PendingOperationTable::new(),
            nacks: Box::new(handler),
            acked: AtomicUsize::new(0),
            nacked: AtomicUsize::new(0),
        }
    }

    /// Records a publish that is about to be sent with the given sequence number
    pub fn track(
        &self,
        sequence: SequenceNumber,
        message_ref: R,
    ) -> Result<ConfirmHandle, TableError> {
        self.table.register(sequence, message_ref)
    }

    /// Removes a publish that never reached the broker and returns its reference
    pub fn forget(&self, sequence: SequenceNumber) -> Option<R> {
        self.table
            .claim(&sequence)
            .map(|claim| claim.settle(Resolution::TransportClosed))
    }

    /// Returns a guard which removes the publish once dropped, unless disarmed
    ///
    /// Covers the window between tracking a publish and handing it to the channel.
    pub fn untrack_on_drop(
        &self,
        sequence: SequenceNumber,
    ) -> CancelOnDrop<'_, SequenceNumber, ConfirmState, R> {
        self.table.cancel_on_drop(sequence)
    }

    fn select(
        &self,
        sequence: SequenceNumber,
        multiple: bool,
    ) -> Vec<Claim<SequenceNumber, ConfirmState, R>> {
        if multiple {
            self.table.claim_through(&sequence)
        } else {
            self.table.claim(&sequence).into_iter().collect()
        }
    }

    /// Marks the publish (or every publish up to it, if `multiple`) as accepted
    ///
    /// Returns the number of entries that have been settled.
    pub fn on_ack(&self, sequence: SequenceNumber, multiple: bool) -> usize {
        let claims = self.select(sequence, multiple);
        let count = claims.len();
        self.acked.fetch_add(count, Ordering::SeqCst);

        for claim in claims {
            claim.settle(Resolution::Resolved(ConfirmState::Acked));
        }

        trace!(sequence, multiple, count, "Applied ack");
        count
    }

    /// Marks the publish (or every publish up to it, if `multiple`) as rejected
    ///
    /// Every rejected entry is handed to the [`NackHandler`] once it has left the tracker.
    /// Returns the number of entries that have been settled.
    pub fn on_nack(&self, sequence: SequenceNumber, multiple: bool) -> usize {
        let claims = self.select(sequence, multiple);
        let count = claims.len();
        self.nacked.fetch_add(count, Ordering::SeqCst);

        for claim in claims {
            let sequence = *claim.token();
            let message_ref = claim.settle(Resolution::Resolved(ConfirmState::Nacked));

            self.nacks.nacked(ConfirmEntry {
                sequence,
                message_ref,
                state: ConfirmState::Nacked,
            });
        }

        trace!(sequence, multiple, count, "Applied nack");
        count
    }

    /// Applies a confirm event emitted by the broker
    pub fn apply(&self, event: ConfirmEvent) -> usize {
        match event.kind {
            ConfirmKind::Ack => self.on_ack(event.sequence, event.multiple),
            ConfirmKind::Nack => self.on_nack(event.sequence, event.multiple),
        }
    }

    /// Fails every outstanding publish because the confirm stream is gone
    pub fn fail_all(&self) -> usize {
        self.table.fail_all()
    }

    /// Waits until no publish is outstanding anymore
    ///
    /// Returns `false` if the deadline elapsed first. Outstanding entries are left in place
    /// and can be inspected through [`outstanding`](ConfirmTracker::outstanding).
    pub async fn drain(&self, deadline: Duration) -> bool {
        self.table.wait_until_empty(deadline).await
    }

    /// Number of publishes awaiting a confirm
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no publish awaits a confirm
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Totals of confirms applied so far
    pub fn stats(&self) -> ConfirmStats {
        ConfirmStats {
            acked: self.acked.load(Ordering::SeqCst),
            nacked: self.nacked.load(Ordering::SeqCst),
        }
    }
}

impl<R: Clone> ConfirmTracker<R> {
    /// Publishes awaiting a confirm in ascending sequence order
    pub fn outstanding(&self) -> Vec<ConfirmEntry<R>> {
        self.table
            .snapshot()
            .into_iter()
            .map(|snapshot| ConfirmEntry {
                sequence: snapshot.token,
                message_ref: snapshot.context,
                state: ConfirmState::Pending,
            })
            .collect()
    }
}

impl<R: Send + 'static> ConfirmTracker<R> {
    /// Spawns the delivery loop applying every event of the stream to the tracker
    ///
    /// Once the stream ends, every publish still outstanding is failed with
    /// [`Resolution::TransportClosed`].
    pub fn listen(
        self: &Arc<Self>,
        mut events: BoxStream<'static, ConfirmEvent>,
    ) -> JoinHandle<()> {
        let tracker = self.clone();

        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                tracker.apply(event);
            }

            match tracker.fail_all() {
                0 => debug!("Confirm stream ended"),
                failed => warn!(failed, "Confirm stream ended with publishes outstanding"),
            }
        })
    }
}
