//! Structures to correlate asynchronous broker events with in-flight operations
//!
//! A message broker only knows how to move messages in one direction. Two patterns
//! built on top of it require the sender to learn about the fate of something it
//! sent earlier:
//!
//! 1. Request and response
//! 2. Publisher confirms
//!
//! In the first, a client publishes a request carrying a correlation id and a private
//! reply address. A server processes it and publishes a reply to that address, echoing
//! the correlation id. The client matches the reply to the waiting caller. This is
//! implemented by the [`RpcClient`](request::RpcClient) and [`RpcServer`](request::RpcServer)
//! in the [`request`] module.
//!
//! In the second, a producer enables confirmations on its channel and the broker emits
//! an acknowledgement (or negative acknowledgement) for each publish, identified by a
//! per-channel sequence number. A single event may cover every publish up to a given
//! sequence number. The [`ConfirmTracker`](confirm::ConfirmTracker) in the [`confirm`] module
//! keeps track of them and the [`ConfirmedPublisher`](confirm::ConfirmedPublisher) drives
//! a producer using one of several [`PublishStrategies`](confirm::PublishStrategy).
//!
//! Both share the same core: a [`PendingOperationTable`](pending::PendingOperationTable)
//! which maps an opaque token to a result slot that is resolved at most once, no matter
//! whether a reply, a timeout, or a cancellation arrives first.
//!
//! The broker itself is an external collaborator described by the traits in the
//! [`broker`] module. Implementations live in [`implementation`].

mod error;

pub mod broker;
pub mod confirm;
pub mod implementation;
pub mod pending;
pub mod request;

pub use error::BlackboxError;
