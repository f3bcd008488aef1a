//! In-process broker implementation
//!
//! Provides every capability described in the [`broker`](super::super::broker) module without any
//! external system. Queues are plain FIFO buffers shared by competing consumers, prefetch limits
//! are enforced by a semaphore per consumer and unsettled deliveries return to the head of their
//! queue when they are dropped. Closing the [`MemoryBroker`] ends every stream and fails every
//! subsequent publish, which makes it suitable for exercising transport loss in tests.

mod broker;
mod channel;
mod delivery;

pub use broker::*;
pub use channel::*;
pub use delivery::*;
