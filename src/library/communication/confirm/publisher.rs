use super::{ConfirmError, ConfirmHandle, ConfirmState, ConfirmTracker, LogNacks, NackHandler};
use crate::library::communication::broker::{Channel, Message, SequenceNumber};
use crate::library::communication::pending::Resolution;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument};

/// Time [`Individual`](PublishStrategy::Individual) and [`Batched`](PublishStrategy::Batched)
/// publishing waits for the confirms of a single wait round
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// Time [`FullyAsync`](PublishStrategy::FullyAsync) publishing waits for all confirms at the end
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Number of bytes of a message body retained for reporting
const PREVIEW_LENGTH: usize = 64;

/// How a producer waits for the confirms of its publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStrategy {
    /// Wait for the confirm of every publish before sending the next one
    Individual,
    /// Wait for all confirms after every batch of the given size and at the end
    Batched(usize),
    /// Never wait while publishing, drain all outstanding confirms at the end
    FullyAsync,
}

impl fmt::Display for PublishStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishStrategy::Individual => write!(f, "individually"),
            PublishStrategy::Batched(size) => write!(f, "in batches of {}", size),
            PublishStrategy::FullyAsync => write!(f, "asynchronously"),
        }
    }
}

/// Error returned when parsing an unknown [`PublishStrategy`]
#[derive(Debug, thiserror::Error)]
#[error("unknown publish strategy {0}, expected individual, batched[:<size>] or async")]
pub struct ParseStrategyError(String);

impl FromStr for PublishStrategy {
    type Err = ParseStrategyError;

    /// Parses `individual`, `async` or `batched:<size>`. A plain `batched` uses a size of 100.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ParseStrategyError(s.to_owned());

        match s.trim().split_once(':') {
            None => match s.trim() {
                "individual" => Ok(PublishStrategy::Individual),
                "batched" => Ok(PublishStrategy::Batched(100)),
                "async" => Ok(PublishStrategy::FullyAsync),
                _ => Err(unknown()),
            },
            Some(("batched", size)) => size
                .parse()
                .map(PublishStrategy::Batched)
                .map_err(|_| unknown()),
            Some(_) => Err(unknown()),
        }
    }
}

/// Outcome of publishing a series of messages
#[derive(Debug, Clone, PartialEq)]
pub struct PublishReport {
    /// Strategy that has been used
    pub strategy: PublishStrategy,
    /// Number of messages handed to the channel
    pub published: usize,
    /// Number of those accepted by the broker
    pub acked: usize,
    /// Number of those rejected by the broker
    pub nacked: usize,
    /// Number of times publishing paused to wait for confirms
    pub waits: usize,
    /// Wall clock time from the first publish until the last confirm
    pub elapsed: Duration,
}

impl fmt::Display for PublishReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Published {} messages {} in {} ({} acked, {} nacked, {} waits)",
            self.published,
            self.strategy,
            crate::library::helpers::format_millis(self.elapsed),
            self.acked,
            self.nacked,
            self.waits
        )
    }
}

/// Identifies a published message in reports and nack notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    /// Zero-based position of the message in the series it was published with
    pub position: usize,
    /// Lossy UTF-8 rendition of the start of the message body
    pub preview: String,
}

impl MessageRef {
    fn new(position: usize, message: &Message) -> Self {
        let body = message.body();
        let preview = String::from_utf8_lossy(&body[..body.len().min(PREVIEW_LENGTH)]);

        Self {
            position,
            preview: preview.into_owned(),
        }
    }
}

/// Producer that publishes to a single destination with publisher confirms enabled
///
/// All publishes go through a single writer so that the sequence number announced by the
/// channel is tracked before the publish it belongs to is sent. The confirm stream of the
/// channel is consumed by a background task for as long as the publisher exists.
pub struct ConfirmedPublisher<C> {
    channel: Arc<C>,
    destination: String,
    tracker: Arc<ConfirmTracker<MessageRef>>,
    writer: Mutex<()>,
    listener: JoinHandle<()>,
    confirm_timeout: Duration,
    drain_timeout: Duration,
}

impl<C> ConfirmedPublisher<C>
where
    C: Channel + Send + Sync + 'static,
{
    /// Enables confirms on the channel and logs every rejected publish
    pub async fn new(
        channel: Arc<C>,
        destination: impl Into<String>,
    ) -> Result<Self, ConfirmError> {
        Self::with_nack_handler(channel, destination, LogNacks).await
    }

    /// Enables confirms on the channel and reports rejected publishes to the given handler
    pub async fn with_nack_handler(
        channel: Arc<C>,
        destination: impl Into<String>,
        handler: impl NackHandler<MessageRef> + 'static,
    ) -> Result<Self, ConfirmError> {
        let events = channel
            .enable_confirms()
            .await
            .map_err(ConfirmError::Transport)?;

        let tracker = Arc::new(ConfirmTracker::with_nack_handler(handler));
        let listener = tracker.listen(events);

        Ok(Self {
            channel,
            destination: destination.into(),
            tracker,
            writer: Mutex::new(()),
            listener,
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        })
    }

    /// Overrides the time a single wait round may take
    pub fn with_confirm_timeout(mut self, confirm_timeout: Duration) -> Self {
        self.confirm_timeout = confirm_timeout;
        self
    }

    /// Overrides the time the final drain of fully asynchronous publishing may take
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Tracker holding the outstanding publishes
    pub fn tracker(&self) -> &Arc<ConfirmTracker<MessageRef>> {
        &self.tracker
    }

    /// Tracks and sends a single message without waiting for its confirm
    ///
    /// Dropping the returned future before the channel accepted the message removes it from
    /// the tracker again.
    pub async fn publish(
        &self,
        position: usize,
        message: Message,
    ) -> Result<ConfirmHandle, ConfirmError> {
        let _writer = self.writer.lock().await;

        let expected = self
            .channel
            .next_publish_sequence()
            .ok_or(ConfirmError::ConfirmsDisabled)?;
        let handle = self
            .tracker
            .track(expected, MessageRef::new(position, &message))?;
        let unsent = self.tracker.untrack_on_drop(expected);

        match self.channel.publish(&self.destination, message).await {
            Ok(Some(assigned)) if assigned == expected => {
                unsent.disarm();
                Ok(handle)
            }
            Ok(assigned) => {
                self.tracker.forget(expected);
                Err(ConfirmError::SequenceMismatch { expected, assigned })
            }
            Err(e) => {
                self.tracker.forget(expected);
                Err(ConfirmError::Transport(e))
            }
        }
    }

    /// Waits for the confirms of the given publishes within one confirm timeout
    ///
    /// Publishes which are still unconfirmed on timeout remain tracked.
    async fn wait_for(&self, handles: Vec<ConfirmHandle>) -> Result<usize, ConfirmError> {
        let deadline = Instant::now() + self.confirm_timeout;
        let mut acked = 0;

        for handle in handles {
            let sequence: SequenceNumber = *handle.token();

            let resolution = timeout_at(deadline, handle.wait())
                .await
                .map_err(|_| ConfirmError::Timeout {
                    outstanding: self.tracker.len(),
                })?;

            match resolution {
                Resolution::Resolved(ConfirmState::Acked) => acked += 1,
                Resolution::Resolved(_) => return Err(ConfirmError::BrokerRejected { sequence }),
                _ => return Err(ConfirmError::TransportClosed),
            }
        }

        Ok(acked)
    }

    /// Publishes every message using the given strategy
    ///
    /// [`Individual`](PublishStrategy::Individual) and [`Batched`](PublishStrategy::Batched)
    /// publishing stops at the first rejected or unconfirmed publish.
    /// [`FullyAsync`](PublishStrategy::FullyAsync) publishing reports rejections in the
    /// returned [`PublishReport`] and through the [`NackHandler`] instead, and only fails if
    /// the confirms did not arrive in time.
    #[instrument(skip(self, messages), fields(destination = %self.destination))]
    pub async fn publish_all<I>(
        &self,
        strategy: PublishStrategy,
        messages: I,
    ) -> Result<PublishReport, ConfirmError>
    where
        I: IntoIterator<Item = Message>,
    {
        let started = Instant::now();
        let mut published = 0;
        let mut acked = 0;
        let mut nacked = 0;
        let mut waits = 0;

        match strategy {
            PublishStrategy::Individual => {
                for (position, message) in messages.into_iter().enumerate() {
                    let handle = self.publish(position, message).await?;
                    published += 1;

                    acked += self.wait_for(vec![handle]).await?;
                    waits += 1;
                }
            }
            PublishStrategy::Batched(size) => {
                let size = size.max(1);
                let mut batch = Vec::with_capacity(size);

                for (position, message) in messages.into_iter().enumerate() {
                    batch.push(self.publish(position, message).await?);
                    published += 1;

                    if batch.len() == size {
                        acked += self.wait_for(std::mem::take(&mut batch)).await?;
                        waits += 1;
                    }
                }

                if !batch.is_empty() {
                    acked += self.wait_for(batch).await?;
                    waits += 1;
                }
            }
            PublishStrategy::FullyAsync => {
                let mut handles = Vec::new();

                for (position, message) in messages.into_iter().enumerate() {
                    handles.push(self.publish(position, message).await?);
                    published += 1;
                }

                debug!(published, "Draining outstanding confirms");

                if !self.tracker.drain(self.drain_timeout).await {
                    return Err(ConfirmError::Timeout {
                        outstanding: self.tracker.len(),
                    });
                }
                waits += 1;

                // Every handle has been claimed at this point and resolves without delay
                for handle in handles {
                    match handle.wait().await {
                        Resolution::Resolved(ConfirmState::Acked) => acked += 1,
                        Resolution::Resolved(_) => nacked += 1,
                        _ => return Err(ConfirmError::TransportClosed),
                    }
                }
            }
        }

        let report = PublishReport {
            strategy,
            published,
            acked,
            nacked,
            waits,
            elapsed: started.elapsed(),
        };

        info!(
            published,
            acked,
            nacked,
            waits,
            "{}",
            report
        );

        Ok(report)
    }
}

impl<C> Drop for ConfirmedPublisher<C> {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
