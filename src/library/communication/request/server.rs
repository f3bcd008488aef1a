use super::{ReplyStatus, RpcError, REPLY_STATUS_HEADER};
use crate::library::communication::broker::{Channel, Delivery, Message};
use crate::library::communication::BlackboxError;
use crate::library::BoxedError;
use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Number of requests processed concurrently unless configured otherwise
pub const DEFAULT_PREFETCH: usize = 1;

/// Structure which processes request payloads and produces reply payloads
#[async_trait]
pub trait RequestHandler {
    /// Handler for requests, returning the reply body
    async fn handle(&self, payload: Vec<u8>) -> Result<Vec<u8>, BoxedError>;
}

#[async_trait]
impl<H> RequestHandler for Arc<H>
where
    H: RequestHandler + Send + Sync + ?Sized,
{
    async fn handle(&self, payload: Vec<u8>) -> Result<Vec<u8>, BoxedError> {
        self.as_ref().handle(payload).await
    }
}

/// What the server does with a request whose handler failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Reply with a failure status and the error chain, then acknowledge the request
    Reply,
    /// Reject the request back to its queue without replying
    ///
    /// Limiting the number of redeliveries is up to the broker's dead-letter configuration.
    Requeue,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Reply
    }
}

/// Error returned when parsing an unknown [`FailurePolicy`]
#[derive(Debug, Error)]
#[error("unknown failure policy {0}, expected reply or requeue")]
pub struct ParsePolicyError(String);

impl FromStr for FailurePolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "reply" => Ok(FailurePolicy::Reply),
            "requeue" => Ok(FailurePolicy::Requeue),
            other => Err(ParsePolicyError(other.to_owned())),
        }
    }
}

/// Server answering requests from a queue
///
/// Requests travel through `Received → Handled → Replied → Acked`. The request is only
/// acknowledged once the reply has been handed to the broker, thus a crash in between leads
/// to a redelivery rather than a lost request. Under the [`Requeue`](FailurePolicy::Requeue)
/// policy a failed request skips the reply and is rejected instead.
pub struct RpcServer<C, H> {
    channel: Arc<C>,
    queue: String,
    handler: H,
    prefetch: usize,
    policy: FailurePolicy,
}

impl<C, H> RpcServer<C, H>
where
    C: Channel + Send + Sync,
    H: RequestHandler + Send + Sync,
{
    /// Creates a new server which processes one request at a time and replies to failures
    pub fn new(channel: Arc<C>, queue: impl Into<String>, handler: H) -> Self {
        Self {
            channel,
            queue: queue.into(),
            handler,
            prefetch: DEFAULT_PREFETCH,
            policy: FailurePolicy::default(),
        }
    }

    /// Limits the number of requests in flight
    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    /// Selects what happens to requests whose handler failed
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Declares the request queue and processes requests until the channel closes
    pub async fn serve(&self) -> Result<(), RpcError> {
        self.channel
            .declare_queue(&self.queue, None)
            .await
            .map_err(RpcError::Consume)?;

        let requests = self
            .channel
            .consume(&self.queue, Some(self.prefetch))
            .await
            .map_err(RpcError::Consume)?;

        info!(queue = %self.queue, prefetch = self.prefetch, "Awaiting RPC requests");

        requests
            .for_each_concurrent(Some(self.prefetch), |item| async move {
                match item {
                    Ok(delivery) => self.process(delivery).await,
                    Err(e) => warn!(error = %e, "Failed to receive request"),
                }
            })
            .await;

        info!(queue = %self.queue, "Request stream ended");

        Ok(())
    }

    async fn process(&self, mut delivery: C::Delivery) {
        let message = delivery.message();
        let correlation_id = message.correlation_id().map(str::to_owned);
        let reply_to = message.reply_to().map(str::to_owned);
        let payload = message.body().to_vec();

        debug!(?correlation_id, "Received request");

        let outcome = AssertUnwindSafe(self.handler.handle(payload))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panic_reason(panic)));

        let reply = match outcome {
            Ok(body) => {
                Message::new(body).with_header(REPLY_STATUS_HEADER, ReplyStatus::Ok.as_str())
            }
            Err(e) => {
                let error = BlackboxError::from_boxed(e);
                warn!(
                    ?correlation_id,
                    error = error.reason().unwrap_or_default(),
                    "Handler failed"
                );

                match self.policy {
                    FailurePolicy::Reply => failure_reply(&error),
                    FailurePolicy::Requeue => {
                        if let Err(e) = delivery.nack(true).await {
                            warn!(?correlation_id, error = %e, "Failed to requeue request");
                        }
                        return;
                    }
                }
            }
        };

        match (reply_to, correlation_id.as_ref()) {
            (Some(reply_to), Some(correlation_id)) => {
                let reply = reply.with_correlation_id(correlation_id.clone());

                match self.channel.publish(&reply_to, reply).await {
                    Ok(_) => debug!(%correlation_id, "Replied"),
                    Err(e) => warn!(%correlation_id, error = %e, "Failed to publish reply"),
                }
            }
            _ => debug!(
                ?correlation_id,
                "Request lacks reply address or correlation id, not replying"
            ),
        }

        if let Err(e) = delivery.ack().await {
            warn!(?correlation_id, error = %e, "Failed to acknowledge request");
        }
    }
}

/// Builds the reply transporting a handler failure
fn failure_reply(error: &BlackboxError) -> Message {
    let body = match serde_json::to_vec(error) {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "Unable to serialize handler failure");
            Vec::new()
        }
    };

    Message::new(body).with_header(REPLY_STATUS_HEADER, ReplyStatus::Failed.as_str())
}

/// Turns the payload of a handler panic into an error carrying its message
fn panic_reason(panic: Box<dyn Any + Send>) -> BoxedError {
    let message = match panic.downcast::<String>() {
        Ok(message) => *message,
        Err(panic) => match panic.downcast_ref::<&str>() {
            Some(message) => (*message).to_owned(),
            None => "unknown cause".to_owned(),
        },
    };

    format!("handler panicked: {}", message).into()
}
