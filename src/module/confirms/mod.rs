//! Benchmarks the ways of waiting for publisher confirms
//!
//! Every selected [`PublishStrategy`] publishes the same number of persistent messages, whose
//! bodies are their decimal index, to a fresh private queue on a fresh channel and reports how
//! long it took until the broker confirmed all of them.

mod options;

use crate::harness::{Heart, Module};
use crate::library::communication::broker::{Channel, Message};
use crate::library::communication::confirm::{ConfirmedPublisher, PublishReport, PublishStrategy};
use crate::library::{BoxedError, EmptyResult};
use crate::module::options::{Broker, Connection};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

pub use options::{Options, StrategySelection};

/// Module implementation
pub struct Confirms {
    options: Options,
    broker: Option<Broker>,
    reports: Vec<PublishReport>,
}

impl Confirms {
    /// Creates a new instance from raw parts
    pub fn new(options: Options) -> Self {
        Self {
            options,
            broker: None,
            reports: Vec::new(),
        }
    }

    /// Reports of the strategies that have been run so far
    pub fn reports(&self) -> &[PublishReport] {
        &self.reports
    }

    #[instrument(skip(self, channel))]
    async fn benchmark<C>(
        &self,
        channel: Arc<C>,
        strategy: PublishStrategy,
    ) -> Result<PublishReport, BoxedError>
    where
        C: Channel + Send + Sync + 'static,
    {
        let queue = channel.declare_reply_queue().await?;
        let publisher = ConfirmedPublisher::new(channel, queue)
            .await?
            .with_confirm_timeout(self.options.confirm_timeout)
            .with_drain_timeout(self.options.drain_timeout);

        let messages = (0..self.options.count)
            .map(|index| Message::new(index.to_string()).with_persistence(true));

        Ok(publisher.publish_all(strategy, messages).await?)
    }
}

#[async_trait]
impl Module for Confirms {
    async fn pre_startup(&mut self) -> EmptyResult {
        self.broker = Some(self.options.broker.broker());
        Ok(())
    }

    async fn run(&mut self) -> Result<Option<Heart>, BoxedError> {
        let broker = self
            .broker
            .clone()
            .ok_or("broker has not been selected")?;

        for strategy in self.options.strategy.strategies(self.options.batch_size) {
            let report = match broker.connect().await? {
                Connection::Memory(channel) => self.benchmark(Arc::new(channel), strategy).await?,
                Connection::Redis(channel) => self.benchmark(Arc::new(channel), strategy).await?,
            };

            info!("{}", report);
            self.reports.push(report);
        }

        Ok(None)
    }
}
