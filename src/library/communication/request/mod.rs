//! Request and response over a one-way broker
//!
//! An [`RpcClient`] publishes each request to a well-known queue, tagged with a fresh
//! correlation id and the address of a private reply queue owned by the client. Before
//! publishing, the call is registered in a [`PendingOperationTable`](super::pending::PendingOperationTable)
//! so that even the fastest reply finds it. A background task consumes the reply queue and
//! resolves calls by correlation id.
//!
//! An [`RpcServer`] consumes the request queue with a bounded number of requests in flight,
//! hands each payload to a [`RequestHandler`] and publishes the outcome to the reply address,
//! echoing the correlation id.
//!
//! Replies carry a [`ReplyStatus`] in the [`REPLY_STATUS_HEADER`]. A failed reply transports a
//! serialized [`BlackboxError`](super::BlackboxError) so that the caller can tell a handler
//! failure apart from an empty result.

mod client;
mod error;
mod server;

pub use client::*;
pub use error::*;
pub use server::*;

use super::broker::Message;
use super::BlackboxError;

/// Message header carrying the [`ReplyStatus`]
pub const REPLY_STATUS_HEADER: &str = "x-reply-status";

/// Outcome of a request as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    /// The handler succeeded and the body holds its result
    Ok,
    /// The handler failed and the body holds a serialized [`BlackboxError`]
    Failed,
}

impl ReplyStatus {
    /// Value used in the [`REPLY_STATUS_HEADER`]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyStatus::Ok => "ok",
            ReplyStatus::Failed => "failed",
        }
    }

    /// Reads the status of a reply. Replies without a status header are successful.
    pub fn of(message: &Message) -> Self {
        match message.header(REPLY_STATUS_HEADER) {
            Some("failed") => ReplyStatus::Failed,
            _ => ReplyStatus::Ok,
        }
    }
}

/// Value a call resolves to once its reply arrived
pub type Reply = Result<Vec<u8>, BlackboxError>;
