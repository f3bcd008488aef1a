use super::{decode, encode, queue_key, RedisDelivery, REPLY_QUEUE_PREFIX};
use crate::library::communication::broker::{
    Address, Channel, ConfirmEvent, Message, SequenceNumber, TransportError,
};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use redis::aio::{Connection, MultiplexedConnection};
use redis::{AsyncCommands, Client, RedisError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Number of seconds a consumer blocks on `BLPOP` before checking for shutdown
const BLOCK_TIMEOUT_SECS: usize = 1;

fn backend(e: RedisError) -> TransportError {
    TransportError::Backend(Box::new(e))
}

/// Confirms synthesised from the outcome of each `RPUSH`
struct ConfirmState {
    next: SequenceNumber,
    sender: mpsc::UnboundedSender<ConfirmEvent>,
}

impl ConfirmState {
    fn assign(&mut self) -> SequenceNumber {
        let sequence = self.next;
        self.next += 1;
        sequence
    }

    fn confirm(&self, sequence: SequenceNumber, accepted: bool) {
        let event = if accepted {
            ConfirmEvent::ack(sequence, false)
        } else {
            ConfirmEvent::nack(sequence, false)
        };

        self.sender.unbounded_send(event).ok();
    }
}

/// [`Channel`] implementation using Redis lists
pub struct RedisChannel {
    client: Client,
    con: MultiplexedConnection,
    writer: AsyncMutex<()>,
    confirms: Mutex<Option<ConfirmState>>,
    shutdown: CancellationToken,
}

impl RedisChannel {
    /// Connects to the redis server at the given URL
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let client = Client::open(url).map_err(backend)?;
        let con = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(backend)?;

        info!(url, "Connected to redis");

        Ok(Self {
            client,
            con,
            writer: AsyncMutex::new(()),
            confirms: Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    /// Closes the channel, ending all streams and failing all future publishes
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    fn confirms(&self) -> MutexGuard<'_, Option<ConfirmState>> {
        self.confirms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.shutdown.is_cancelled() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    fn assign_sequence(&self) -> Option<SequenceNumber> {
        self.confirms().as_mut().map(ConfirmState::assign)
    }

    fn confirm(&self, sequence: Option<SequenceNumber>, accepted: bool) {
        if let (Some(sequence), Some(state)) = (sequence, self.confirms().as_ref()) {
            state.confirm(sequence, accepted);
        }
    }
}

#[async_trait]
impl Channel for RedisChannel {
    type Delivery = RedisDelivery;

    async fn declare_queue(
        &self,
        name: &str,
        max_length: Option<usize>,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;

        // Lists spring into existence on first push
        if max_length.is_some() {
            warn!(queue = name, "Queue length limits are not supported by redis lists");
        }

        Ok(())
    }

    async fn declare_reply_queue(&self) -> Result<Address, TransportError> {
        self.ensure_open()?;
        Ok(format!("{}{}", REPLY_QUEUE_PREFIX, Uuid::new_v4()))
    }

    async fn publish(
        &self,
        destination: &str,
        message: Message,
    ) -> Result<Option<SequenceNumber>, TransportError> {
        self.ensure_open()?;

        let payload = encode(&message)?;
        let mut con = self.con.clone();

        let _writer = self.writer.lock().await;
        let sequence = self.assign_sequence();
        let result = con
            .rpush::<_, _, ()>(queue_key(destination), payload)
            .await;

        self.confirm(sequence, result.is_ok());
        result.map_err(backend)?;

        Ok(sequence)
    }

    async fn consume(
        &self,
        queue: &str,
        prefetch: Option<usize>,
    ) -> Result<BoxStream<'static, Result<RedisDelivery, TransportError>>, TransportError> {
        self.ensure_open()?;

        // BLPOP blocks the whole connection, thus every consumer needs its own
        let blocking: Connection = self.client.get_async_connection().await.map_err(backend)?;
        let ack_con = self.con.clone();
        let key = queue_key(queue);
        let limiter = prefetch.map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        let shutdown = self.shutdown.clone();

        debug!(%key, ?prefetch, "Consuming redis list");

        let stream = stream::unfold(
            (blocking, ack_con, key, limiter, shutdown),
            |(mut blocking, ack_con, key, limiter, shutdown)| async move {
                let permit = match &limiter {
                    Some(limiter) => tokio::select! {
                        permit = limiter.clone().acquire_owned() => Some(permit.ok()?),
                        _ = shutdown.cancelled() => return None,
                    },
                    None => None,
                };

                loop {
                    if shutdown.is_cancelled() {
                        return None;
                    }

                    let popped = blocking
                        .blpop::<_, Option<(String, Vec<u8>)>>(key.as_str(), BLOCK_TIMEOUT_SECS)
                        .await;

                    let raw = match popped {
                        Ok(Some((_, raw))) => raw,
                        Ok(None) => continue,
                        Err(e) => {
                            error!(%key, error = %e, "Encountered error reading from redis list");
                            return None;
                        }
                    };

                    let item = decode(&raw).map(|message| {
                        RedisDelivery::new(ack_con.clone(), key.clone(), raw, message, permit)
                    });

                    return Some((item, (blocking, ack_con, key, limiter, shutdown)));
                }
            },
        );

        Ok(stream.boxed())
    }

    async fn enable_confirms(&self) -> Result<BoxStream<'static, ConfirmEvent>, TransportError> {
        self.ensure_open()?;

        let _writer = self.writer.lock().await;
        let (sender, receiver) = mpsc::unbounded();
        let mut confirms = self.confirms();
        let next = confirms.as_ref().map(|state| state.next).unwrap_or(1);
        *confirms = Some(ConfirmState { next, sender });
        drop(confirms);

        let shutdown = self.shutdown.clone();
        let stream = receiver.take_until(async move { shutdown.cancelled().await });

        Ok(stream.boxed())
    }

    fn next_publish_sequence(&self) -> Option<SequenceNumber> {
        self.confirms().as_ref().map(|state| state.next)
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::communication::broker::Delivery;
    use pretty_assertions::assert_eq;

    #[test]
    fn synthesise_confirms_in_publish_order() {
        let (sender, mut receiver) = mpsc::unbounded();
        let mut state = ConfirmState { next: 1, sender };

        let first = state.assign();
        let second = state.assign();
        state.confirm(first, true);
        state.confirm(second, false);

        assert_eq!((first, second, state.next), (1, 2, 3));
        assert_eq!(receiver.try_next().unwrap(), Some(ConfirmEvent::ack(1, false)));
        assert_eq!(receiver.try_next().unwrap(), Some(ConfirmEvent::nack(2, false)));
    }

    /// Connects to the server named by `REDIS`, if any
    async fn live_channel() -> Option<RedisChannel> {
        let url = std::env::var("REDIS").ok()?;
        Some(RedisChannel::connect(&url).await.unwrap())
    }

    #[tokio::test]
    #[ignore = "requires a redis server named by the REDIS environment variable"]
    async fn confirm_and_redeliver_against_a_live_server() {
        let channel = match live_channel().await {
            Some(channel) => channel,
            None => return,
        };
        let queue = format!("test.{}", Uuid::new_v4());
        let mut confirms = channel.enable_confirms().await.unwrap();

        let sequence = channel
            .publish(&queue, Message::new("5").with_correlation_id("c1"))
            .await
            .unwrap();
        assert_eq!(sequence, Some(1));
        assert_eq!(confirms.next().await, Some(ConfirmEvent::ack(1, false)));

        let mut deliveries = channel.consume(&queue, Some(1)).await.unwrap();

        let mut delivery = deliveries.next().await.unwrap().unwrap();
        assert_eq!(delivery.message().correlation_id(), Some("c1"));
        delivery.nack(true).await.unwrap();
        drop(delivery);

        // Requeued by the nack, then returned once more by dropping it unsettled
        let delivery = deliveries.next().await.unwrap().unwrap();
        assert_eq!(delivery.message().body(), b"5");
        drop(delivery);

        let mut delivery = deliveries.next().await.unwrap().unwrap();
        assert_eq!(delivery.message().body(), b"5");
        delivery.ack().await.unwrap();

        channel.close();
        assert!(deliveries.next().await.is_none());
    }

    #[tokio::test]
    #[ignore = "requires a redis server named by the REDIS environment variable"]
    async fn hand_out_distinct_reply_queues() {
        let channel = match live_channel().await {
            Some(channel) => channel,
            None => return,
        };

        let first = channel.declare_reply_queue().await.unwrap();
        let second = channel.declare_reply_queue().await.unwrap();

        assert!(first.starts_with(REPLY_QUEUE_PREFIX));
        assert_ne!(first, second);
    }
}
