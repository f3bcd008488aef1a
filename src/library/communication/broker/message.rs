use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier placed on a request and echoed on its reply
pub type CorrelationId = String;

/// Name of a destination messages can be published to
pub type Address = String;

/// Unit of data moved by the broker
///
/// The body is opaque to this crate. A message is owned by its sender until it is handed to
/// [`Channel::publish`](super::Channel::publish), afterwards delivery is the broker's business.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    body: Vec<u8>,
    correlation_id: Option<CorrelationId>,
    reply_to: Option<Address>,
    persistent: bool,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

impl Message {
    /// Creates a new transient message with the given body
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    /// Attaches a correlation id
    pub fn with_correlation_id(mut self, correlation_id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Attaches an address to which replies should be sent
    pub fn with_reply_to(mut self, reply_to: impl Into<Address>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Sets whether the broker should persist the message
    pub fn with_persistence(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Attaches an application header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Opaque payload
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consumes the message and returns the payload
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Correlation id, if any
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Reply address, if any
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Whether the broker should persist the message
    pub fn persistent(&self) -> bool {
        self.persistent
    }

    /// Value of an application header
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}
