//! Subscriber fan-out for one session.
//!
//! Every subscriber owns a bounded channel. Publishing never waits: a full
//! channel drops the message (counted in `subscriber_drops_total`) and a closed
//! channel is removed. Terminal messages are the exception; when a channel is
//! full they are handed to a short-lived tracked task so the subscriber still
//! sees how the run ended.
//!
//! Reply chunks are coalesced in an output buffer and released when it reaches
//! the flush threshold, on an explicit flush, or just before any other message.

use std::collections::HashMap;
use std::time::Duration;

use metrics::counter;
use planrun_core::metrics::SUBSCRIBER_DROPS_TOTAL;
use planrun_core::{StreamMessage, SubscriptionId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// How long a terminal message may wait for room in a full channel.
const TERMINAL_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Subscribers and output buffer of a session.
#[derive(Debug)]
pub struct SubscriptionHub {
    subscribers: HashMap<SubscriptionId, mpsc::Sender<StreamMessage>>,
    buffer: String,
    capacity: usize,
    flush_bytes: usize,
    dropped: u64,
    closed: bool,
    tracker: TaskTracker,
}

impl SubscriptionHub {
    /// Hub whose subscriber channels hold `capacity` messages and whose buffer
    /// flushes at `flush_bytes` (0 disables coalescing). Deferred terminal
    /// sends run on `tracker`.
    pub fn new(capacity: usize, flush_bytes: usize, tracker: TaskTracker) -> Self {
        Self {
            subscribers: HashMap::new(),
            buffer: String::new(),
            capacity: capacity.max(1),
            flush_bytes,
            dropped: 0,
            closed: false,
            tracker,
        }
    }

    /// Register a subscriber.
    ///
    /// After [`close`](Self::close) the returned receiver yields nothing.
    pub fn subscribe(&mut self) -> (SubscriptionId, mpsc::Receiver<StreamMessage>) {
        let id = SubscriptionId::new();
        let (tx, rx) = mpsc::channel(self.capacity);
        if !self.closed {
            let _ = self.subscribers.insert(id.clone(), tx);
            debug!(subscription_id = %id, subscribers = self.subscribers.len(), "subscriber added");
        }
        (id, rx)
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&mut self, id: &SubscriptionId) -> bool {
        let removed = self.subscribers.remove(id).is_some();
        if removed {
            debug!(subscription_id = %id, subscribers = self.subscribers.len(), "subscriber removed");
        }
        removed
    }

    /// Publish a message to every subscriber.
    pub fn publish(&mut self, msg: StreamMessage) {
        if self.closed {
            return;
        }
        match msg {
            StreamMessage::Reply { chunk } => {
                self.buffer.push_str(&chunk);
                if self.buffer.len() >= self.flush_bytes {
                    self.flush_buffer();
                }
            }
            other => {
                self.flush_buffer();
                self.send(&other);
            }
        }
    }

    /// Deliver any buffered reply text as one `Reply` message.
    pub fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let chunk = std::mem::take(&mut self.buffer);
        self.send(&StreamMessage::Reply { chunk });
    }

    /// Flush, then drop every subscriber. Receivers drain what was already
    /// delivered and then end.
    pub fn close(&mut self) {
        self.flush_buffer();
        self.subscribers.clear();
        self.closed = true;
    }

    /// Current subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Messages dropped on full channels so far.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    /// Bytes of reply text waiting in the buffer.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn send(&mut self, msg: &StreamMessage) {
        let terminal = msg.is_terminal();
        let mut dropped = 0u64;
        let tracker = &self.tracker;
        self.subscribers.retain(|id, tx| match tx.try_send(msg.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) if terminal => {
                let tx = tx.clone();
                let _ = tracker.spawn(async move {
                    let _ = tokio::time::timeout(TERMINAL_SEND_TIMEOUT, tx.send(msg)).await;
                });
                true
            }
            Err(TrySendError::Full(_)) => {
                dropped += 1;
                warn!(subscription_id = %id, message_type = msg.message_type(), "subscriber channel full, message dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscription_id = %id, "subscriber gone, removing");
                false
            }
        });
        if dropped > 0 {
            self.dropped += dropped;
            counter!(SUBSCRIBER_DROPS_TOTAL).increment(dropped);
        }
    }
}
