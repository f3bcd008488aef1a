//! Various options usable by modules
//!
//! The structs in this module allow other modules to flatten them into
//! their own options struct. This allows for a unified yet non-cluttered
//! option set.

use crate::library::communication::broker::TransportError;
use crate::library::communication::implementation::memory::{MemoryBroker, MemoryChannel};
use crate::library::communication::implementation::redis::RedisChannel;
use structopt::StructOpt;
use tracing::info;

/// Options for selecting the message broker
#[derive(Debug, StructOpt)]
pub struct BrokerOptions {
    /// Redis server URL used as the message broker
    ///
    /// Omitting it runs against an in-process broker which is not shared with other processes
    #[structopt(
        short = "r",
        long = "redis",
        env = "REDIS",
        global = true,
        value_name = "url"
    )]
    pub redis: Option<String>,
}

impl BrokerOptions {
    /// Broker selected by the options
    pub fn broker(&self) -> Broker {
        match &self.redis {
            Some(url) => Broker::Redis(url.clone()),
            None => {
                info!("No Redis URL provided, using an in-process broker");
                Broker::Memory(MemoryBroker::new())
            }
        }
    }
}

/// Message broker channels can be opened on
#[derive(Clone)]
pub enum Broker {
    /// In-process broker
    Memory(MemoryBroker),
    /// Redis server at the given URL
    Redis(String),
}

/// Open channel to one of the supported brokers
pub enum Connection {
    /// Channel on an in-process broker
    Memory(MemoryChannel),
    /// Channel on a Redis server
    Redis(RedisChannel),
}

impl Broker {
    /// Opens a new channel
    pub async fn connect(&self) -> Result<Connection, TransportError> {
        match self {
            Broker::Memory(broker) => Ok(Connection::Memory(broker.channel())),
            Broker::Redis(url) => Ok(Connection::Redis(RedisChannel::connect(url).await?)),
        }
    }
}
