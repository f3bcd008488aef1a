//! Implementations of the [`broker`](super::broker) traits

pub mod memory;
pub mod redis;
