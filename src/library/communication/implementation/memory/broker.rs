use super::MemoryChannel;
use crate::library::communication::broker::{Message, TransportError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

const REPLY_QUEUE_PREFIX: &str = "amq.gen-";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Outcome of handing a message to the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Routing {
    /// Appended to the destination queue
    Enqueued,
    /// Destination queue does not exist, message has been discarded
    Unroutable,
    /// Destination queue is full, message has been rejected
    Rejected,
}

/// Named FIFO buffer shared by all consumers of a queue
pub(super) struct MemoryQueue {
    name: String,
    max_length: Option<usize>,
    messages: Mutex<VecDeque<Message>>,
    pub(super) available: Notify,
}

impl MemoryQueue {
    fn new(name: String, max_length: Option<usize>) -> Self {
        Self {
            name,
            max_length,
            messages: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }

    pub(super) fn name(&self) -> &str {
        &self.name
    }

    fn push(&self, message: Message) -> Routing {
        let mut messages = lock(&self.messages);

        if let Some(max_length) = self.max_length {
            if messages.len() >= max_length {
                return Routing::Rejected;
            }
        }

        messages.push_back(message);
        drop(messages);

        self.available.notify_waiters();
        Routing::Enqueued
    }

    /// Returns a previously delivered message to the head of the queue
    pub(super) fn requeue(&self, message: Message) {
        lock(&self.messages).push_front(message);
        self.available.notify_waiters();
    }

    pub(super) fn pop(&self) -> Option<Message> {
        lock(&self.messages).pop_front()
    }

    fn len(&self) -> usize {
        lock(&self.messages).len()
    }
}

struct BrokerState {
    queues: Mutex<HashMap<String, Arc<MemoryQueue>>>,
    published: AtomicUsize,
    shutdown: CancellationToken,
}

/// Broker living entirely in the current process
///
/// Cloning it is cheap and yields a handle to the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Creates a new broker without any queues
    pub fn new() -> Self {
        Self {
            state: Arc::new(BrokerState {
                queues: Mutex::new(HashMap::new()),
                published: AtomicUsize::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Opens a new channel on this broker
    pub fn channel(&self) -> MemoryChannel {
        MemoryChannel::new(self.clone())
    }

    /// Tears down the broker, ending all streams and failing all future publishes
    pub fn close(&self) {
        info!("Closing memory broker");
        self.state.shutdown.cancel();
    }

    /// Whether [`close`](MemoryBroker::close) has been called
    pub fn is_closed(&self) -> bool {
        self.state.shutdown.is_cancelled()
    }

    /// Total number of publishes accepted by the broker (including rejected and unroutable ones)
    pub fn published(&self) -> usize {
        self.state.published.load(Ordering::SeqCst)
    }

    /// Number of messages waiting in a queue, `None` if it does not exist
    pub fn queue_len(&self, name: &str) -> Option<usize> {
        lock(&self.state.queues).get(name).map(|queue| queue.len())
    }

    pub(super) fn shutdown(&self) -> &CancellationToken {
        &self.state.shutdown
    }

    pub(super) fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    pub(super) fn declare(&self, name: &str, max_length: Option<usize>) {
        lock(&self.state.queues)
            .entry(name.to_owned())
            .or_insert_with(|| {
                debug!(queue = name, ?max_length, "Declaring queue");
                Arc::new(MemoryQueue::new(name.to_owned(), max_length))
            });
    }

    pub(super) fn declare_exclusive(&self) -> String {
        let name = format!("{}{}", REPLY_QUEUE_PREFIX, Uuid::new_v4());
        self.declare(&name, None);
        name
    }

    pub(super) fn queue(&self, name: &str) -> Option<Arc<MemoryQueue>> {
        lock(&self.state.queues).get(name).cloned()
    }

    pub(super) fn route(&self, destination: &str, message: Message) -> Routing {
        self.state.published.fetch_add(1, Ordering::SeqCst);

        match self.queue(destination) {
            Some(queue) => queue.push(message),
            None => {
                debug!(destination, "Discarding unroutable message");
                Routing::Unroutable
            }
        }
    }
}
