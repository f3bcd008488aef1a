//! Requests a single Fibonacci number and prints the reply

mod options;

use crate::harness::{Heart, Module};
use crate::library::communication::broker::Channel;
use crate::library::communication::request::RpcClient;
use crate::library::{BoxedError, EmptyResult};
use crate::module::options::Connection;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub use options::Options;

/// Module implementation
pub struct Client {
    options: Options,
    connection: Option<Connection>,
}

impl Client {
    /// Creates a new instance from raw parts
    pub fn new(options: Options) -> Self {
        Self {
            options,
            connection: None,
        }
    }

    async fn request<C>(&self, channel: Arc<C>) -> Result<String, BoxedError>
    where
        C: Channel + Send + Sync + 'static,
    {
        let client = RpcClient::new(channel, self.options.queue.clone()).await?;

        info!("[x] Requesting Fib({})", self.options.n);
        let reply = client
            .call(self.options.n.to_string(), self.options.timeout)
            .await?;

        Ok(String::from_utf8_lossy(&reply).into_owned())
    }
}

#[async_trait]
impl Module for Client {
    async fn pre_startup(&mut self) -> EmptyResult {
        self.connection = Some(self.options.broker.broker().connect().await?);
        Ok(())
    }

    async fn run(&mut self) -> Result<Option<Heart>, BoxedError> {
        let reply = match self.connection.take() {
            Some(Connection::Memory(channel)) => self.request(Arc::new(channel)).await?,
            Some(Connection::Redis(channel)) => self.request(Arc::new(channel)).await?,
            None => return Err("broker connection has not been established".into()),
        };

        info!("[.] Got '{}'", reply);

        Ok(None)
    }
}
