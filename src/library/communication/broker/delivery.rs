use super::Message;
use crate::library::EmptyResult;
use async_trait::async_trait;

/// Message received from a queue which has to be settled explicitly
///
/// Settling a delivery more than once has no effect. Implementations return a delivery
/// that has been dropped without being settled to its queue.
#[async_trait]
pub trait Delivery {
    /// Message that has been delivered
    fn message(&self) -> &Message;

    /// Acknowledge the delivery as processed
    async fn ack(&mut self) -> EmptyResult;

    /// Reject the delivery, optionally returning it to the head of its queue
    async fn nack(&mut self, requeue: bool) -> EmptyResult;
}
