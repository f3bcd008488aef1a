use super::ConfirmEntry;
use std::fmt::Debug;
use tokio::sync::mpsc;
use tracing::warn;

/// Policy deciding what happens to publishes the broker rejected
///
/// Called from the confirm delivery loop once per rejected publish after it has been removed
/// from the tracker. Implementations must not block.
pub trait NackHandler<R>: Send + Sync {
    /// Processes a rejected publish
    fn nacked(&self, entry: ConfirmEntry<R>);
}

/// Logs rejected publishes and drops them
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNacks;

impl<R: Debug> NackHandler<R> for LogNacks {
    fn nacked(&self, entry: ConfirmEntry<R>) {
        warn!(
            sequence = entry.sequence,
            message = ?entry.message_ref,
            "Message has been nack-ed"
        );
    }
}

/// Forwards rejected publishes to a channel so the owner may republish or dead-letter them
pub struct ForwardNacks<R> {
    sender: mpsc::UnboundedSender<ConfirmEntry<R>>,
}

impl<R> ForwardNacks<R> {
    /// Creates a new handler and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConfirmEntry<R>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl<R: Debug + Send> NackHandler<R> for ForwardNacks<R> {
    fn nacked(&self, entry: ConfirmEntry<R>) {
        if let Err(mpsc::error::SendError(entry)) = self.sender.send(entry) {
            warn!(
                sequence = entry.sequence,
                "Nack receiver has gone away, dropping rejected publish"
            );
        }
    }
}
