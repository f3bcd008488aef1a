use crate::library::communication::broker::{Delivery, Message};
use crate::library::EmptyResult;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::runtime::Handle;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, warn};

/// Redis based implementation of the [`Delivery`] trait
pub struct RedisDelivery {
    con: MultiplexedConnection,
    key: String,
    raw: Vec<u8>,
    message: Message,
    permit: Option<OwnedSemaphorePermit>,
    settled: bool,
}

impl RedisDelivery {
    pub(super) fn new(
        con: MultiplexedConnection,
        key: String,
        raw: Vec<u8>,
        message: Message,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        Self {
            con,
            key,
            raw,
            message,
            permit,
            settled: false,
        }
    }
}

#[async_trait]
impl Delivery for RedisDelivery {
    fn message(&self) -> &Message {
        &self.message
    }

    async fn ack(&mut self) -> EmptyResult {
        self.settled = true;
        self.permit.take();
        Ok(())
    }

    async fn nack(&mut self, requeue: bool) -> EmptyResult {
        if self.settled {
            return Ok(());
        }

        self.settled = true;

        if requeue {
            self.con
                .lpush::<_, _, ()>(self.key.as_str(), self.raw.as_slice())
                .await?;
        }

        self.permit.take();
        Ok(())
    }
}

impl Drop for RedisDelivery {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        debug!(key = %self.key, "Returning unsettled delivery");

        let mut con = self.con.clone();
        let key = std::mem::take(&mut self.key);
        let raw = std::mem::take(&mut self.raw);

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = con.lpush::<_, _, ()>(key.as_str(), raw).await {
                        warn!(%key, error = %e, "Failed to return unsettled delivery");
                    }
                });
            }
            Err(_) => warn!(%key, "Unable to return unsettled delivery outside of a runtime"),
        }
    }
}
