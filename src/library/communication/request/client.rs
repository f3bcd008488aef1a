use super::{Reply, ReplyStatus, RpcError};
use crate::library::communication::broker::{
    Address, Channel, CorrelationId, Delivery, Message, TransportError,
};
use crate::library::communication::pending::{PendingOperationTable, Resolution};
use crate::library::communication::BlackboxError;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

type PendingCalls = PendingOperationTable<CorrelationId, Reply>;

/// Client calling remote procedures through a broker
///
/// Every client owns a private reply queue and a background task consuming it. Calls may be
/// issued concurrently from any number of tasks.
///
/// Once the reply stream ends (e.g. because the connection was lost), every pending call
/// fails with [`RpcError::TransportClosed`] and so does every later call.
pub struct RpcClient<C> {
    channel: Arc<C>,
    request_queue: String,
    reply_to: Address,
    pending: Arc<PendingCalls>,
    closed: Arc<AtomicBool>,
    consumer: JoinHandle<()>,
}

impl<C> RpcClient<C>
where
    C: Channel + Send + Sync + 'static,
{
    /// Declares a reply queue and starts consuming it
    pub async fn new(channel: Arc<C>, request_queue: impl Into<String>) -> Result<Self, RpcError> {
        let reply_to = channel
            .declare_reply_queue()
            .await
            .map_err(RpcError::Consume)?;
        let replies = channel
            .consume(&reply_to, None)
            .await
            .map_err(RpcError::Consume)?;

        let pending = Arc::new(PendingCalls::new());
        let closed = Arc::new(AtomicBool::new(false));
        let consumer = tokio::spawn(receive_replies(replies, pending.clone(), closed.clone()));

        debug!(reply_to = %reply_to, "Awaiting replies");

        Ok(Self {
            channel,
            request_queue: request_queue.into(),
            reply_to,
            pending,
            closed,
            consumer,
        })
    }

    /// Address replies to this client are sent to
    pub fn reply_to(&self) -> &str {
        &self.reply_to
    }

    /// Calls currently awaiting a reply
    pub fn pending(&self) -> &PendingOperationTable<CorrelationId, Reply> {
        &self.pending
    }

    /// Whether the reply stream has ended
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sends the payload as a request and waits for its reply
    ///
    /// If no reply arrives within `timeout`, the call is removed and a reply arriving later
    /// on is discarded. The same happens when the returned future is dropped early.
    pub async fn call(
        &self,
        payload: impl Into<Vec<u8>>,
        timeout: Duration,
    ) -> Result<Vec<u8>, RpcError> {
        self.execute(payload.into(), timeout, None).await
    }

    /// Same as [`call`](RpcClient::call) but can be withdrawn early through the token
    ///
    /// Withdrawing does not notify the server. It will still process the request and reply.
    pub async fn call_with_cancellation(
        &self,
        payload: impl Into<Vec<u8>>,
        timeout: Duration,
        cancellation: &CancellationToken,
    ) -> Result<Vec<u8>, RpcError> {
        self.execute(payload.into(), timeout, Some(cancellation))
            .await
    }

    #[instrument(skip(self, payload, cancellation), fields(queue = %self.request_queue))]
    async fn execute(
        &self,
        payload: Vec<u8>,
        timeout: Duration,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Vec<u8>, RpcError> {
        let correlation_id = Uuid::new_v4().to_string();
        let handle = self.pending.register(correlation_id.clone(), ())?;
        let _abandoned = self.pending.cancel_on_drop(correlation_id.clone());

        // Registered after the reply stream ended, nobody is going to fail this call
        if self.is_closed() {
            self.pending.claim(&correlation_id);
            return Err(RpcError::TransportClosed);
        }

        let request = Message::new(payload)
            .with_correlation_id(correlation_id.clone())
            .with_reply_to(self.reply_to.clone());

        if let Err(e) = self.channel.publish(&self.request_queue, request).await {
            self.pending.claim(&correlation_id);

            return Err(match e {
                TransportError::Closed => RpcError::TransportClosed,
                e => RpcError::Publish(e),
            });
        }

        trace!(correlation_id = %correlation_id, "Sent request");

        match self.pending.wait(handle, Some(timeout), cancellation).await {
            Resolution::Resolved(Ok(body)) => Ok(body),
            Resolution::Resolved(Err(e)) => Err(RpcError::HandlerFailure(e)),
            Resolution::Cancelled => {
                debug!(correlation_id = %correlation_id, "Call cancelled");
                Err(RpcError::Cancelled)
            }
            Resolution::TimedOut => {
                warn!(correlation_id = %correlation_id, ?timeout, "Call timed out");
                Err(RpcError::Timeout)
            }
            Resolution::TransportClosed => Err(RpcError::TransportClosed),
        }
    }
}

impl<C> Drop for RpcClient<C> {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}

/// Converts a reply message into the value of the call it belongs to
fn decode_reply(message: &Message) -> Reply {
    match ReplyStatus::of(message) {
        ReplyStatus::Ok => Ok(message.body().to_vec()),
        ReplyStatus::Failed => Err(serde_json::from_slice(message.body()).unwrap_or_else(|e| {
            BlackboxError::from_reason(format!("malformed failure reply: {}", e))
        })),
    }
}

/// Delivery loop resolving calls until the reply stream ends
async fn receive_replies<D>(
    mut replies: BoxStream<'static, Result<D, TransportError>>,
    pending: Arc<PendingCalls>,
    closed: Arc<AtomicBool>,
) where
    D: Delivery + Send + 'static,
{
    while let Some(item) = replies.next().await {
        let mut delivery = match item {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!(error = %e, "Failed to receive reply");
                continue;
            }
        };

        let message = delivery.message();
        match message.correlation_id() {
            Some(correlation_id) => {
                if !pending.resolve(&correlation_id.to_owned(), decode_reply(message)) {
                    debug!(correlation_id, "Discarding reply without pending call");
                }
            }
            None => warn!("Discarding reply without correlation id"),
        }

        if let Err(e) = delivery.ack().await {
            warn!(error = %e, "Failed to acknowledge reply");
        }
    }

    closed.store(true, Ordering::SeqCst);

    match pending.fail_all() {
        0 => debug!("Reply stream ended"),
        failed => warn!(failed, "Reply stream ended with calls pending"),
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::communication::implementation::memory::{MemoryBroker, MemoryChannel};
    use crate::library::communication::request::REPLY_STATUS_HEADER;
    use pretty_assertions::assert_eq;

    const QUEUE: &str = "requests";

    async fn client() -> (Arc<MemoryChannel>, RpcClient<MemoryChannel>) {
        let channel = Arc::new(MemoryBroker::new().channel());
        channel.declare_queue(QUEUE, None).await.unwrap();
        let client = RpcClient::new(channel.clone(), QUEUE).await.unwrap();
        (channel, client)
    }

    /// Answers the next request in the queue with the given reply
    async fn answer(channel: &MemoryChannel, reply: impl FnOnce(&Message) -> Message) {
        let mut requests = channel.consume(QUEUE, Some(1)).await.unwrap();
        let mut delivery = requests.next().await.unwrap().unwrap();
        let request = delivery.message().clone();

        let response = reply(&request).with_correlation_id(request.correlation_id().unwrap());
        channel
            .publish(request.reply_to().unwrap(), response)
            .await
            .unwrap();
        delivery.ack().await.unwrap();
    }

    #[test]
    fn decode_failed_replies() {
        let error = BlackboxError::from_reason("overflow");
        let message = Message::new(serde_json::to_vec(&error).unwrap())
            .with_header(REPLY_STATUS_HEADER, "failed");

        assert_eq!(decode_reply(&message), Err(error));
    }

    #[test]
    fn decode_replies_without_status_as_success() {
        assert_eq!(decode_reply(&Message::new("8")), Ok(b"8".to_vec()));
    }

    #[tokio::test]
    async fn resolve_call_with_matching_reply() {
        let (channel, client) = client().await;

        let server = channel.clone();
        tokio::spawn(async move {
            answer(&server, |request| {
                let n: u64 = String::from_utf8_lossy(request.body()).parse().unwrap();
                Message::new((n * 2).to_string())
            })
            .await
        });

        let reply = client.call("21", Duration::from_secs(2)).await.unwrap();

        assert_eq!(reply, b"42".to_vec());
        assert!(client.pending().is_empty());
    }

    #[tokio::test]
    async fn send_correlation_id_and_reply_address() {
        let (channel, client) = client().await;
        let call = client.call("x", Duration::from_millis(50));

        let inspect = async {
            let mut requests = channel.consume(QUEUE, None).await.unwrap();
            let delivery = requests.next().await.unwrap().unwrap();
            let message = delivery.message().clone();
            (message, client.pending().tokens())
        };

        let (result, (message, pending)) = tokio::join!(call, inspect);

        assert!(matches!(result, Err(RpcError::Timeout)));
        assert_eq!(message.reply_to(), Some(client.reply_to()));
        assert_eq!(pending, vec![message.correlation_id().unwrap().to_owned()]);
    }

    #[tokio::test]
    async fn remove_call_on_timeout() {
        let (_channel, client) = client().await;

        let result = client.call("unanswered", Duration::from_millis(30)).await;

        assert!(matches!(result, Err(RpcError::Timeout)));
        assert!(client.pending().is_empty());
    }

    #[tokio::test]
    async fn surface_remote_handler_failures() {
        let (channel, client) = client().await;

        let server = channel.clone();
        tokio::spawn(async move {
            answer(&server, |_| {
                let error = BlackboxError::from_reason("not a number");
                Message::new(serde_json::to_vec(&error).unwrap())
                    .with_header(REPLY_STATUS_HEADER, "failed")
            })
            .await
        });

        let result = client.call("abc", Duration::from_secs(2)).await;

        match result {
            Err(RpcError::HandlerFailure(e)) => assert_eq!(e.reason(), Some("not a number")),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn remove_calls_whose_future_is_dropped() {
        let (_channel, client) = client().await;

        let call = client.call("abandoned", Duration::from_secs(5));
        assert!(tokio::time::timeout(Duration::from_millis(20), call)
            .await
            .is_err());

        assert!(client.pending().is_empty());
    }

    #[tokio::test]
    async fn withdraw_cancelled_calls() {
        let (_channel, client) = client().await;
        let cancellation = CancellationToken::new();

        let canceller = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = client
            .call_with_cancellation("x", Duration::from_secs(5), &cancellation)
            .await;

        assert!(matches!(result, Err(RpcError::Cancelled)));
        assert!(client.pending().is_empty());
    }

    #[tokio::test]
    async fn fail_pending_and_later_calls_on_transport_loss() {
        let (channel, client) = client().await;

        let broker = channel.broker().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            broker.close();
        });

        let pending = client.call("x", Duration::from_secs(5)).await;
        let later = client.call("y", Duration::from_secs(5)).await;

        assert!(matches!(pending, Err(RpcError::TransportClosed)));
        assert!(matches!(later, Err(RpcError::TransportClosed)));
        assert!(client.pending().is_empty());
    }
}
