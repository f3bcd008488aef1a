//! Runs a server and a client within the same process and performs a single call

mod options;

use crate::domain::{FibonacciHandler, RPC_QUEUE};
use crate::harness::{Heart, Module};
use crate::library::communication::broker::Channel;
use crate::library::communication::implementation::redis::RedisChannel;
use crate::library::communication::request::{RpcClient, RpcServer};
use crate::library::BoxedError;
use crate::module::options::Broker;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub use options::Options;

/// Module implementation
pub struct Demo {
    options: Options,
    reply: Option<String>,
}

impl Demo {
    /// Creates a new instance from raw parts
    pub fn new(options: Options) -> Self {
        Self {
            options,
            reply: None,
        }
    }

    /// Reply received by the last run
    pub fn reply(&self) -> Option<&str> {
        self.reply.as_deref()
    }

    async fn exchange<C>(
        &self,
        server_channel: Arc<C>,
        client_channel: Arc<C>,
    ) -> Result<String, BoxedError>
    where
        C: Channel + Send + Sync + 'static,
    {
        // Declared up front so the request is not dropped as unroutable
        server_channel.declare_queue(RPC_QUEUE, None).await?;

        let server = RpcServer::new(server_channel, RPC_QUEUE, FibonacciHandler);
        let serving = tokio::spawn(async move { server.serve().await });

        let client = RpcClient::new(client_channel, RPC_QUEUE).await?;

        info!("[x] Requesting Fib({})", self.options.n);
        let result = client
            .call(self.options.n.to_string(), self.options.timeout)
            .await;

        serving.abort();

        let reply = String::from_utf8_lossy(&result?).into_owned();
        info!("[.] Got '{}'", reply);

        Ok(reply)
    }
}

#[async_trait]
impl Module for Demo {
    async fn run(&mut self) -> Result<Option<Heart>, BoxedError> {
        let reply = match self.options.broker.broker() {
            Broker::Memory(broker) => {
                self.exchange(Arc::new(broker.channel()), Arc::new(broker.channel()))
                    .await?
            }
            Broker::Redis(url) => {
                let server = RedisChannel::connect(&url).await?;
                let client = RedisChannel::connect(&url).await?;
                self.exchange(Arc::new(server), Arc::new(client)).await?
            }
        };

        self.reply = Some(reply);

        Ok(None)
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::communication::request::RpcError;
    use crate::module::options::BrokerOptions;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn demo(n: u64) -> Demo {
        Demo::new(Options {
            broker: BrokerOptions { redis: None },
            n,
            timeout: Duration::from_secs(5),
        })
    }

    #[tokio::test]
    async fn compute_a_fibonacci_number_remotely() {
        let mut demo = demo(5);

        assert!(demo.run().await.unwrap().is_none());
        assert_eq!(demo.reply(), Some("5"));
    }

    #[tokio::test]
    async fn surface_remote_failures() {
        let mut demo = demo(100);

        let error = demo.run().await.unwrap_err();

        assert!(matches!(
            error.downcast_ref::<RpcError>(),
            Some(RpcError::HandlerFailure(_))
        ));
        assert_eq!(demo.reply(), None);
    }
}
