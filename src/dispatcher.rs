//! Inbound frame dispatcher
//!
//! Publish-subscribe fan-out of decoded frames. The read loop calls
//! `publish`; every subscribed observer is called synchronously, in
//! subscription order, with the same shared `&Frame`.
//!
//! A failing observer (returned error or panic) is logged and counted. It
//! never stops the remaining observers or the read loop.

use crate::codec::Frame;
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Result an observer returns for a single frame
pub type ObserverResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Consumer of decoded inbound frames
pub trait Observer: Send + Sync {
    fn on_frame(&self, frame: &Frame) -> ObserverResult;
}

impl<F> Observer for F
where
    F: Fn(&Frame) -> ObserverResult + Send + Sync,
{
    fn on_frame(&self, frame: &Frame) -> ObserverResult {
        self(frame)
    }
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Frame fan-out to registered observers
#[derive(Default)]
pub struct Dispatcher {
    observers: RwLock<Vec<(SubscriptionId, Arc<dyn Observer>)>>,
    next_id: AtomicU64,
    failures: AtomicU64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer; it sees every frame published from now on
    pub fn subscribe(&self, observer: impl Observer + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, Arc::new(observer)));
        id
    }

    /// Remove an observer; returns false if the handle was unknown
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(sid, _)| *sid != id);
        observers.len() != before
    }

    /// Notify every observer of `frame`
    ///
    /// The observer list is snapshotted first, so observers may subscribe or
    /// unsubscribe from inside a callback without deadlocking.
    pub fn publish(&self, frame: &Frame) {
        let snapshot: Vec<_> = self.observers.read().clone();

        for (id, observer) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| observer.on_frame(frame))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(subscription = id.0, "Observer failed: {}", e);
                }
                Err(_) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(subscription = id.0, "Observer panicked");
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Observer errors and panics caught so far
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
