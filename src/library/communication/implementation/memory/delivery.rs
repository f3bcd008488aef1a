use super::broker::MemoryQueue;
use crate::library::communication::broker::{Delivery, Message};
use crate::library::EmptyResult;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;

/// [`Delivery`] handed out by a [`MemoryChannel`](super::MemoryChannel) consumer
///
/// Holds one unit of the consumer's prefetch allowance until it is settled.
pub struct MemoryDelivery {
    message: Message,
    queue: Arc<MemoryQueue>,
    permit: Option<OwnedSemaphorePermit>,
    settled: bool,
}

impl MemoryDelivery {
    pub(super) fn new(
        message: Message,
        queue: Arc<MemoryQueue>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        Self {
            message,
            queue,
            permit,
            settled: false,
        }
    }

    fn settle(&mut self, requeue: bool) {
        if self.settled {
            return;
        }

        self.settled = true;

        if requeue {
            self.queue.requeue(self.message.clone());
        }

        self.permit.take();
    }
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn message(&self) -> &Message {
        &self.message
    }

    async fn ack(&mut self) -> EmptyResult {
        self.settle(false);
        Ok(())
    }

    async fn nack(&mut self, requeue: bool) -> EmptyResult {
        self.settle(requeue);
        Ok(())
    }
}

impl Drop for MemoryDelivery {
    fn drop(&mut self) {
        if !self.settled {
            debug!(queue = self.queue.name(), "Returning unsettled delivery");
            self.settle(true);
        }
    }
}
