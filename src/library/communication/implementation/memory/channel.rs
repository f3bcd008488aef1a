use super::broker::{MemoryQueue, Routing};
use super::{MemoryBroker, MemoryDelivery};
use crate::library::communication::broker::{
    Address, Channel, ConfirmEvent, Message, SequenceNumber, TransportError,
};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// First sequence number assigned after enabling confirms
const FIRST_SEQUENCE: SequenceNumber = 1;

/// How a [`MemoryChannel`] in confirm mode emits its confirm events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmMode {
    /// Every publish is confirmed as soon as it has been routed. Publishes rejected by a
    /// full queue are negatively acknowledged.
    Immediate,
    /// No events are emitted on their own, they have to be injected using
    /// [`MemoryChannel::inject_confirm`]
    Manual,
}

struct ConfirmState {
    next: SequenceNumber,
    mode: ConfirmMode,
    sender: mpsc::UnboundedSender<ConfirmEvent>,
}

/// [`Channel`] implementation backed by a [`MemoryBroker`]
pub struct MemoryChannel {
    broker: MemoryBroker,
    mode: ConfirmMode,
    confirms: Mutex<Option<ConfirmState>>,
}

impl MemoryChannel {
    pub(super) fn new(broker: MemoryBroker) -> Self {
        Self {
            broker,
            mode: ConfirmMode::Immediate,
            confirms: Mutex::new(None),
        }
    }

    /// Selects how confirm events are emitted once confirms are enabled
    pub fn with_confirm_mode(mut self, mode: ConfirmMode) -> Self {
        self.mode = mode;
        self
    }

    /// Broker this channel has been opened on
    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }

    /// Emits a confirm event as if it originated from the broker
    ///
    /// Returns `false` if confirms are not enabled or nobody listens anymore.
    pub fn inject_confirm(&self, event: ConfirmEvent) -> bool {
        match self.confirms().as_ref() {
            Some(state) => state.sender.unbounded_send(event).is_ok(),
            None => false,
        }
    }

    fn confirms(&self) -> MutexGuard<'_, Option<ConfirmState>> {
        self.confirms.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    type Delivery = MemoryDelivery;

    async fn declare_queue(
        &self,
        name: &str,
        max_length: Option<usize>,
    ) -> Result<(), TransportError> {
        self.broker.ensure_open()?;
        self.broker.declare(name, max_length);
        Ok(())
    }

    async fn declare_reply_queue(&self) -> Result<Address, TransportError> {
        self.broker.ensure_open()?;
        Ok(self.broker.declare_exclusive())
    }

    async fn publish(
        &self,
        destination: &str,
        message: Message,
    ) -> Result<Option<SequenceNumber>, TransportError> {
        self.broker.ensure_open()?;

        // Routing happens under the confirm lock so that sequence numbers follow publish order
        let mut confirms = self.confirms();
        let routing = self.broker.route(destination, message);

        if routing == Routing::Rejected {
            debug!(destination, "Queue is full, rejecting message");
        }

        let sequence = confirms.as_mut().map(|state| {
            let sequence = state.next;
            state.next += 1;

            if state.mode == ConfirmMode::Immediate {
                let event = match routing {
                    Routing::Rejected => ConfirmEvent::nack(sequence, false),
                    Routing::Enqueued | Routing::Unroutable => ConfirmEvent::ack(sequence, false),
                };

                state.sender.unbounded_send(event).ok();
            }

            sequence
        });

        trace!(destination, ?sequence, "Published message");

        Ok(sequence)
    }

    async fn consume(
        &self,
        queue: &str,
        prefetch: Option<usize>,
    ) -> Result<BoxStream<'static, Result<MemoryDelivery, TransportError>>, TransportError> {
        self.broker.ensure_open()?;

        let queue = self
            .broker
            .queue(queue)
            .ok_or_else(|| TransportError::UnknownQueue(queue.to_owned()))?;
        let limiter = prefetch.map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        let shutdown = self.broker.shutdown().clone();

        let stream = stream::unfold(
            (queue, limiter, shutdown),
            |(queue, limiter, shutdown)| async move {
                let permit = match &limiter {
                    Some(limiter) => tokio::select! {
                        permit = limiter.clone().acquire_owned() => Some(permit.ok()?),
                        _ = shutdown.cancelled() => return None,
                    },
                    None => None,
                };

                let message = next_message(&queue, &shutdown).await?;
                let delivery = MemoryDelivery::new(message, queue.clone(), permit);

                Some((Ok(delivery), (queue, limiter, shutdown)))
            },
        );

        Ok(stream.boxed())
    }

    async fn enable_confirms(&self) -> Result<BoxStream<'static, ConfirmEvent>, TransportError> {
        self.broker.ensure_open()?;

        let (sender, receiver) = mpsc::unbounded();
        let mut confirms = self.confirms();
        let next = confirms
            .as_ref()
            .map(|state| state.next)
            .unwrap_or(FIRST_SEQUENCE);

        *confirms = Some(ConfirmState {
            next,
            mode: self.mode,
            sender,
        });

        let shutdown = self.broker.shutdown().clone();
        let stream = receiver.take_until(async move { shutdown.cancelled().await });

        Ok(stream.boxed())
    }

    fn next_publish_sequence(&self) -> Option<SequenceNumber> {
        self.confirms().as_ref().map(|state| state.next)
    }
}

/// Waits for the next message in the queue or the broker to shut down
async fn next_message(queue: &MemoryQueue, shutdown: &CancellationToken) -> Option<Message> {
    loop {
        let notified = queue.available.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if shutdown.is_cancelled() {
            return None;
        }

        if let Some(message) = queue.pop() {
            return Some(message);
        }

        tokio::select! {
            _ = notified => {}
            _ = shutdown.cancelled() => return None,
        }
    }
}
