//! Bounded FIFO channels with a drop-oldest overflow policy.
//!
//! A [`BoundedChannel`] hands payloads between exactly two stages. Sends
//! never wait: when the channel is full the oldest buffered item is evicted
//! so a stalled consumer cannot stall its producer. For live data, staleness
//! is worse than loss; the eviction is counted and reported rather than
//! hidden.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::{Error, Result};

/// Outcome of a successful send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The item was appended with room to spare.
    Enqueued,
    /// The channel was full; the oldest item was evicted first.
    DroppedOldest,
}

impl SendOutcome {
    /// Whether this send evicted a buffered item.
    pub fn dropped_oldest(&self) -> bool {
        matches!(self, SendOutcome::DroppedOldest)
    }
}

/// Counters exposed by every channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelStats {
    /// Items handed to a receiver.
    pub delivered: u64,
    /// Items evicted by the overflow policy.
    pub dropped: u64,
    /// Items currently buffered.
    pub depth: usize,
}

struct ChannelState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A fixed-capacity FIFO queue shared by exactly two stages.
///
/// The upstream stage sends, the downstream stage receives; no third party
/// may touch the data path. The runtime enforces a single consumer per
/// channel, which is what makes the internal [`Notify`] hand-off sound.
pub struct BoundedChannel<T> {
    name: String,
    capacity: usize,
    state: Mutex<ChannelState<T>>,
    available: Notify,
    dropped: AtomicU64,
    delivered: AtomicU64,
}

impl<T> BoundedChannel<T> {
    /// Create a channel with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. [`PipelineGraph::link`] validates
    /// capacities before construction and returns [`Error::InvalidCapacity`]
    /// instead.
    ///
    /// [`PipelineGraph::link`]: crate::graph::PipelineGraph::link
    pub fn new(capacity: usize) -> Self {
        Self::named(capacity, "channel")
    }

    /// Create a channel with a label used in logs and stats reports.
    pub fn named<S: Into<String>>(capacity: usize, name: S) -> Self {
        assert!(capacity > 0, "channel capacity must be positive");
        Self {
            name: name.into(),
            capacity,
            state: Mutex::new(ChannelState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            available: Notify::new(),
            dropped: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    /// The channel's label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The fixed capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items currently buffered.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Snapshot of the channel's counters.
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            depth: self.len(),
        }
    }

    /// Append an item without waiting.
    ///
    /// When the channel is at capacity the oldest buffered item is evicted
    /// and the `dropped` counter incremented; the outcome reports the
    /// eviction. Fails with [`Error::ChannelClosed`] once [`close`] has been
    /// called.
    ///
    /// [`close`]: BoundedChannel::close
    pub fn send(&self, item: T) -> Result<SendOutcome> {
        let outcome = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(Error::ChannelClosed);
            }
            let evicted = if state.items.len() == self.capacity {
                state.items.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            } else {
                false
            };
            state.items.push_back(item);
            if evicted {
                SendOutcome::DroppedOldest
            } else {
                SendOutcome::Enqueued
            }
        };

        #[cfg(feature = "metrics")]
        if outcome.dropped_oldest() {
            metrics::counter!("framepipe_channel_dropped_total", "channel" => self.name.clone())
                .increment(1);
        }

        self.available.notify_one();
        Ok(outcome)
    }

    /// Receive the oldest item, waiting up to `timeout`.
    ///
    /// Returns `None` when the timeout elapses, or immediately once the
    /// channel is closed and drained (end-of-stream). Buffered items remain
    /// receivable after `close`.
    pub async fn recv(&self, timeout: Duration) -> Option<T> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before re-checking so a send landing between
            // the check and the await leaves a stored permit.
            let available = self.available.notified();
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            if tokio::time::timeout_at(deadline, available).await.is_err() {
                // Deadline elapsed; one last look in case of a late send.
                return self.try_pop();
            }
        }
    }

    /// Receive the oldest item without waiting.
    pub fn recv_now(&self) -> Option<T> {
        self.try_pop()
    }

    fn try_pop(&self) -> Option<T> {
        let item = self.state.lock().unwrap().items.pop_front();
        if item.is_some() {
            self.delivered.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            metrics::counter!("framepipe_channel_delivered_total", "channel" => self.name.clone())
                .increment(1);
        }
        item
    }

    /// Close the channel.
    ///
    /// Idempotent. Subsequent sends fail; receives continue to drain any
    /// buffered items, then report end-of-stream.
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.available.notify_waiters();
    }
}

impl<T> std::fmt::Debug for BoundedChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedChannel")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}
