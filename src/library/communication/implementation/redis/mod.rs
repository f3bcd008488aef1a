//! Trait implementations using [`redis`](::redis)
//!
//! Queues are mapped onto [Redis Lists](https://redis.io/topics/data-types#lists). Publishing
//! appends a JSON encoded [`Message`](super::super::broker::Message) using `RPUSH` and consumers
//! block on the head of the list using `BLPOP`. Since popping is destructive, acknowledging a
//! delivery is a no-op while a requeueing nack pushes the message back to the head of the list.
//! In consequence, a consumer crashing while processing loses the delivery.
//!
//! Redis has no notion of publisher confirms. When they are enabled, the channel synthesises
//! them from the reply to each `RPUSH`: an acknowledgement once the server has appended the
//! message, a negative acknowledgement if the command failed.

use crate::library::communication::broker::{Message, TransportError};

const QUEUE_KEY_PREFIX: &str = "queue.";
const REPLY_QUEUE_PREFIX: &str = "reply.";

mod channel;
mod delivery;

pub use channel::*;
pub use delivery::*;

fn queue_key(queue: &str) -> String {
    format!("{}{}", QUEUE_KEY_PREFIX, queue)
}

fn encode(message: &Message) -> Result<Vec<u8>, TransportError> {
    serde_json::to_vec(message).map_err(|e| TransportError::Backend(Box::new(e)))
}

fn decode(raw: &[u8]) -> Result<Message, TransportError> {
    serde_json::from_slice(raw).map_err(|e| TransportError::Backend(Box::new(e)))
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn prefix_queue_keys() {
        assert_eq!(queue_key("rpc_queue"), "queue.rpc_queue");
        assert_eq!(
            queue_key(&format!("{}abc", REPLY_QUEUE_PREFIX)),
            "queue.reply.abc"
        );
    }

    #[test]
    fn keep_every_field_on_the_wire() {
        let message = Message::new(vec![0u8, 159, 146, 150])
            .with_correlation_id("c1")
            .with_reply_to("reply.x")
            .with_persistence(true)
            .with_header("x-reply-status", "failed");

        assert_eq!(decode(&encode(&message).unwrap()).unwrap(), message);
    }

    #[test]
    fn accept_messages_without_headers() {
        let raw = br#"{"body":[56],"correlation_id":null,"reply_to":null,"persistent":false}"#;

        assert_eq!(decode(raw).unwrap(), Message::new("8"));
    }

    #[test]
    fn reject_garbage() {
        assert!(matches!(
            decode(b"not json"),
            Err(TransportError::Backend(_))
        ));
    }
}
