//! Answers Fibonacci requests arriving on the RPC queue

mod options;

use crate::domain::FibonacciHandler;
use crate::harness::{Heart, HeartStone, Module, ModuleTerminationReason};
use crate::library::communication::broker::Channel;
use crate::library::communication::request::RpcServer;
use crate::library::{BoxedError, EmptyResult};
use crate::module::options::Connection;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub use options::Options;

/// Module implementation
pub struct Server {
    options: Options,
    connection: Option<Connection>,
    task: Option<JoinHandle<()>>,
}

impl Server {
    /// Creates a new instance from raw parts
    pub fn new(options: Options) -> Self {
        Self {
            options,
            connection: None,
            task: None,
        }
    }

    fn spawn<C>(&self, channel: Arc<C>, stone: HeartStone) -> JoinHandle<()>
    where
        C: Channel + Send + Sync + 'static,
    {
        let server = RpcServer::new(channel, self.options.queue.clone(), FibonacciHandler)
            .with_prefetch(self.options.prefetch)
            .with_failure_policy(self.options.on_failure);

        tokio::spawn(async move {
            let reason = match server.serve().await {
                Ok(()) => "request stream ended".to_owned(),
                Err(e) => format!("serving requests failed: {}", e),
            };

            stone.kill(reason).await;
        })
    }
}

#[async_trait]
impl Module for Server {
    async fn pre_startup(&mut self) -> EmptyResult {
        self.connection = Some(self.options.broker.broker().connect().await?);
        Ok(())
    }

    async fn run(&mut self) -> Result<Option<Heart>, BoxedError> {
        let (heart, stone) = Heart::new();

        let task = match self.connection.take() {
            Some(Connection::Memory(channel)) => self.spawn(Arc::new(channel), stone),
            Some(Connection::Redis(channel)) => self.spawn(Arc::new(channel), stone),
            None => return Err("broker connection has not been established".into()),
        };

        self.task = Some(task);

        Ok(Some(heart))
    }

    async fn post_shutdown(&mut self, termination_reason: &ModuleTerminationReason) {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        if termination_reason.is_success() {
            info!("Server stopped");
        } else {
            error!(%termination_reason, "Server terminated with an error");
        }
    }
}
