use crate::library::communication::broker::TransportError;
use crate::library::communication::pending::TableError;
use crate::library::communication::BlackboxError;
use thiserror::Error;

/// Errors that may occur while calling a remote procedure
#[derive(Error, Debug)]
pub enum RpcError {
    /// No reply arrived before the deadline
    #[error("no reply received within the deadline")]
    Timeout,
    /// The caller withdrew from the call
    #[error("call has been cancelled")]
    Cancelled,
    /// The reply consumer or the channel went away while the call was pending
    #[error("transport closed while awaiting the reply")]
    TransportClosed,
    /// The server reported that its handler failed
    #[error("remote handler failed")]
    HandlerFailure(#[source] BlackboxError),
    /// The request or reply could not be published
    #[error("unable to publish message")]
    Publish(#[source] TransportError),
    /// A queue could not be declared or consumed
    #[error("unable to consume queue")]
    Consume(#[source] TransportError),
    /// The call could not be registered
    #[error("unable to register call")]
    Registration(#[from] TableError),
}
