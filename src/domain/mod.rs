//! Structures and constants specific to the correlator tools
//!
//! Anything in here builds on top of the [`library`](super::library) and gives it meaning:
//! which queues the tools talk through, how long they are willing to wait and what the
//! server actually computes.

use std::time::Duration;

mod fibonacci;

pub use fibonacci::*;

/// Well-known queue RPC requests are sent to
pub const RPC_QUEUE: &str = "rpc_queue";

/// Time a client waits for a reply unless configured otherwise
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
