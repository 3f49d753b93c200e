//! Traffic statistics for the link
//!
//! Thread-safe counters shared by the read and write loops.
//! Uses lock-free atomics for all operations.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Link counters (fully lock-free)
#[derive(Debug, Default)]
pub struct Stats {
    /// Total bytes written to the device
    tx_bytes: AtomicU64,
    /// Total bytes read from the device
    rx_bytes: AtomicU64,
    /// Frames written
    frames_out: AtomicU64,
    /// Frames decoded and dispatched
    frames_in: AtomicU64,
    /// Malformed frames detected (one per resync episode)
    malformed: AtomicU64,
    /// Bytes skipped while resynchronizing
    discarded: AtomicU64,
    write_failures: AtomicU64,
    read_failures: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub frames_out: u64,
    pub frames_in: u64,
    pub malformed_frames: u64,
    pub discarded_bytes: u64,
    pub write_failures: u64,
    pub read_failures: u64,
    /// Filled in by the session from the dispatcher
    pub observer_failures: u64,
    /// Filled in by the session from the queue
    pub queue_dropped: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one frame written (Host -> Device)
    #[inline]
    pub fn add_tx(&self, bytes: usize) {
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.frames_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Record raw bytes read (Device -> Host)
    #[inline]
    pub fn add_rx(&self, bytes: usize) {
        self.rx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record the outcome of one decode pass
    #[inline]
    pub fn add_decoded(&self, frames: usize, malformed: u64, discarded: u64) {
        self.frames_in.fetch_add(frames as u64, Ordering::Relaxed);
        self.malformed.fetch_add(malformed, Ordering::Relaxed);
        self.discarded.fetch_add(discarded, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_read_failure(&self) {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn tx_bytes(&self) -> u64 {
        self.tx_bytes.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn rx_bytes(&self) -> u64 {
        self.rx_bytes.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    /// Malformed-frame diagnostic counter
    #[inline]
    pub fn malformed_frames(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            frames_in: self.frames_in.load(Ordering::Relaxed),
            malformed_frames: self.malformed.load(Ordering::Relaxed),
            discarded_bytes: self.discarded.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            observer_failures: 0,
            queue_dropped: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = Stats::new();
        stats.add_tx(10);
        stats.add_tx(10);
        stats.add_rx(25);
        stats.add_decoded(2, 1, 5);
        stats.add_write_failure();

        assert_eq!(stats.tx_bytes(), 20);
        assert_eq!(stats.rx_bytes(), 25);
        assert_eq!(stats.malformed_frames(), 1);
        assert_eq!(stats.write_failures(), 1);

        let snap = stats.snapshot();
        assert_eq!(snap.tx_bytes, 20);
        assert_eq!(snap.frames_out, 2);
        assert_eq!(snap.rx_bytes, 25);
        assert_eq!(snap.frames_in, 2);
        assert_eq!(snap.malformed_frames, 1);
        assert_eq!(snap.discarded_bytes, 5);
        assert_eq!(snap.write_failures, 1);
        assert_eq!(snap.read_failures, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_string(&Stats::new().snapshot()).unwrap();
        assert!(json.contains("\"malformed_frames\":0"));
    }
}
