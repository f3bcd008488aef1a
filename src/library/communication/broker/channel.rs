use super::{Address, ConfirmEvent, Delivery, Message, SequenceNumber};
use crate::library::BoxedError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Errors raised by broker channels
#[derive(Error, Debug)]
pub enum TransportError {
    /// The connection or channel has been torn down
    #[error("connection or channel has been closed")]
    Closed,
    /// The queue has not been declared
    #[error("queue {0} does not exist")]
    UnknownQueue(String),
    /// The backing system reported an error
    #[error("broker backend failure")]
    Backend(#[source] BoxedError),
}

/// Session with the broker through which messages are published and consumed
///
/// A channel is not meant to be shared by concurrent writers when publisher confirms are in
/// use: the sequence number reported by [`next_publish_sequence`](Channel::next_publish_sequence)
/// is only meaningful for the publish that immediately follows it. Callers serialise their
/// publishes under a single writer (see [`ConfirmedPublisher`](crate::library::communication::confirm::ConfirmedPublisher)).
#[async_trait]
pub trait Channel {
    /// Type of [`Delivery`] returned by [`consume`](Channel::consume)
    type Delivery: Delivery + Send + Sync + 'static;

    /// Creates a queue if it does not exist yet, optionally limiting its length
    async fn declare_queue(&self, name: &str, max_length: Option<usize>)
        -> Result<(), TransportError>;

    /// Creates a private queue with a broker-assigned name for receiving replies
    async fn declare_reply_queue(&self) -> Result<Address, TransportError>;

    /// Hands a message to the broker for delivery to the given destination
    ///
    /// Returns the sequence number assigned to the publish if confirms are enabled.
    async fn publish(
        &self,
        destination: &str,
        message: Message,
    ) -> Result<Option<SequenceNumber>, TransportError>;

    /// Subscribes to a queue, allowing at most `prefetch` unsettled deliveries at once
    ///
    /// The stream ends when the channel is closed.
    async fn consume(
        &self,
        queue: &str,
        prefetch: Option<usize>,
    ) -> Result<BoxStream<'static, Result<Self::Delivery, TransportError>>, TransportError>;

    /// Puts the channel into confirm mode and returns the stream of confirm events
    ///
    /// The stream ends when the channel is closed.
    async fn enable_confirms(&self) -> Result<BoxStream<'static, ConfirmEvent>, TransportError>;

    /// Sequence number that will be assigned to the next publish, if confirms are enabled
    fn next_publish_sequence(&self) -> Option<SequenceNumber>;
}
