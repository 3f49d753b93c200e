//! Outbound frame queue
//!
//! Decouples callers from the single physical write path. Any number of
//! threads may `submit`; only the session's write loop drains. Items are
//! handed out strictly in submission order.
//!
//! Sequence numbers are assigned while the lock is held, so the sequence
//! order is the order in which `submit` calls completed.

use crate::constants::DEFAULT_QUEUE_CAPACITY;
use crate::error::{LinkError, Result};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Capacity policy for the outbound queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePolicy {
    /// Grow without limit (low send rates, device may be absent for a while)
    #[default]
    Unbounded,
    /// Evict the oldest pending item when full
    DropOldest { capacity: usize },
    /// Refuse new submissions when full
    RejectNew { capacity: usize },
}

impl QueuePolicy {
    pub fn capacity(&self) -> Option<usize> {
        match self {
            Self::Unbounded => None,
            Self::DropOldest { capacity } | Self::RejectNew { capacity } => Some(*capacity),
        }
    }

    pub fn drop_oldest() -> Self {
        Self::DropOldest {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn reject_new() -> Self {
        Self::RejectNew {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// An encoded frame waiting for the write loop
#[derive(Debug, Clone)]
pub struct OutboundItem {
    /// Submission order, starting at 0
    pub seq: u64,
    pub enqueued_at: Instant,
    pub bytes: Bytes,
}

struct Inner {
    items: VecDeque<OutboundItem>,
    /// Taken by the drainer but not yet reported back via `complete`/`restore`
    in_flight: usize,
}

/// Thread-safe FIFO of encoded frames
pub struct OutboundQueue {
    inner: Mutex<Inner>,
    available: Condvar,
    policy: QueuePolicy,
    next_seq: AtomicU64,
    dropped: AtomicU64,
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new(QueuePolicy::Unbounded)
    }
}

impl OutboundQueue {
    pub fn new(policy: QueuePolicy) -> Self {
        let initial = policy.capacity().unwrap_or(16);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(initial),
                in_flight: 0,
            }),
            available: Condvar::new(),
            policy,
            next_seq: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Enqueue encoded bytes; never waits on the transport
    ///
    /// Returns the sequence number assigned to the item.
    ///
    /// # Errors
    ///
    /// `QueueFull` under `RejectNew` when the queue is at capacity.
    pub fn submit(&self, bytes: impl Into<Bytes>) -> Result<u64> {
        let bytes = bytes.into();
        let mut inner = self.inner.lock();
        let items = &mut inner.items;

        match self.policy {
            QueuePolicy::Unbounded => {}
            QueuePolicy::DropOldest { capacity } => {
                while items.len() >= capacity.max(1) {
                    if let Some(evicted) = items.pop_front() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(seq = evicted.seq, "Queue full, dropped oldest item");
                    }
                }
            }
            QueuePolicy::RejectNew { capacity } => {
                if items.len() >= capacity {
                    return Err(LinkError::QueueFull { capacity });
                }
            }
        }

        // Assigned under the lock so seq order == queue order
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        items.push_back(OutboundItem {
            seq,
            enqueued_at: Instant::now(),
            bytes,
        });
        drop(inner);

        self.available.notify_one();
        Ok(seq)
    }

    /// Take the oldest item without waiting
    ///
    /// The item counts as in flight until the drainer calls `complete` or
    /// `restore`.
    pub fn drain_next(&self) -> Option<OutboundItem> {
        Self::take(&mut self.inner.lock())
    }

    /// Take the oldest item, waiting at most `timeout` for one to arrive
    ///
    /// Returns `None` on timeout so the caller can re-check its stop flag.
    pub fn wait_next(&self, timeout: Duration) -> Option<OutboundItem> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = Self::take(&mut inner) {
                return Some(item);
            }
            if self.available.wait_until(&mut inner, deadline).timed_out() {
                return Self::take(&mut inner);
            }
        }
    }

    fn take(inner: &mut Inner) -> Option<OutboundItem> {
        let item = inner.items.pop_front()?;
        inner.in_flight += 1;
        Some(item)
    }

    /// Report that an item taken by the drainer has left the queue for good
    /// (written or failed)
    pub fn complete(&self) {
        let mut inner = self.inner.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
    }

    /// Put an unwritten item back at the head, keeping its place in line
    pub fn restore(&self, item: OutboundItem) {
        let mut inner = self.inner.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        inner.items.push_front(item);
        drop(inner);
        self.available.notify_one();
    }

    /// Wake a waiting drainer without adding an item
    pub fn wake(&self) {
        self.available.notify_all();
    }

    /// Discard every pending item, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let n = inner.items.len();
        inner.items.clear();
        n
    }

    /// Items waiting to be taken (in-flight items not included)
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Items taken by the drainer and not yet completed
    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight
    }

    /// Nothing queued and nothing being written
    pub fn is_idle(&self) -> bool {
        let inner = self.inner.lock();
        inner.items.is_empty() && inner.in_flight == 0
    }

    /// Items evicted by the `DropOldest` policy so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
