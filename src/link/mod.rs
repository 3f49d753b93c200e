//! Link session - one serial connection and its read/write loops
//!
//! The session handles:
//! - Connection lifecycle (`open`, `close`, `drain_and_close`, `abort`)
//! - Outbound queue (callers submit, the write loop drains)
//! - Inbound dispatch (the read loop decodes, observers are notified)
//! - Status events and statistics
//!
//! The session does NOT handle:
//! - Port discovery (the caller supplies a port name)
//! - Reconnection policy (the caller decides whether to `open` again)
//!
//! State machine:
//!
//! ```text
//! Disconnected ──open──▶ Connecting ──ok──▶ Connected ──close──▶ Closing ──▶ Disconnected
//!      ▲                     │                  │
//!      └────── open failed ──┘                  └── transport failure ──▶ Disconnected
//! ```

mod loops;
pub mod stats;

use self::loops::{read_loop, write_loop, LoopContext};
use self::stats::{Stats, StatsSnapshot};
use crate::codec::{encode, Frame, LengthPolicy};
use crate::constants::{DEFAULT_POLL_INTERVAL_MS, EVENT_CHANNEL_CAPACITY};
use crate::dispatcher::{Dispatcher, Observer, SubscriptionId};
use crate::error::{LinkError, Result};
use crate::queue::{OutboundQueue, QueuePolicy};
use crate::transport::Transport;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        };
        f.write_str(s)
    }
}

/// Connection status signal for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LinkEvent {
    Connected { port: String },
    Disconnected { port: String },
    /// Transport failure; always followed by `Disconnected`
    Error { port: String, reason: String },
}

/// Session tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
    /// Longest the write loop waits on an empty queue before re-checking state
    pub poll_interval: Duration,
    pub length_policy: LengthPolicy,
    pub queue_policy: QueuePolicy,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            length_policy: LengthPolicy::Strict,
            queue_policy: QueuePolicy::Unbounded,
        }
    }
}

/// State shared between the session and its loops
pub(crate) struct Shared {
    state: RwLock<LinkState>,
    events: broadcast::Sender<LinkEvent>,
}

impl Shared {
    fn set_state(&self, state: LinkState) {
        *self.state.write() = state;
    }

    fn emit(&self, event: LinkEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// A live connection: its stop flag and loop threads
struct Connection {
    port: String,
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl Connection {
    /// Wait for the loops to exit
    ///
    /// Skips the calling thread, so an observer may close the session from
    /// inside the read loop.
    fn join(self) {
        let current = std::thread::current().id();
        for handle in self.threads {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::warn!(port = %self.port, "Link loop thread panicked");
            }
        }
    }
}

/// Framed, queued, single-connection serial link
///
/// # Example
///
/// ```ignore
/// let session = LinkSession::new(SerialTransport::default(), LinkOptions::default());
/// session.on_frame_received(|frame: &Frame| -> ObserverResult {
///     println!("LEDs: {:032b}", frame.bitmask());
///     Ok(())
/// });
/// session.open("/dev/ttyUSB0", 115_200)?;
/// session.submit_frame(0x01, [0x02, 0x16], 0x00, 0x00, &[0x01, 0x02, 0x03, 0x04])?;
/// session.drain_and_close(Duration::from_secs(1))?;
/// ```
pub struct LinkSession {
    transport: Box<dyn Transport>,
    options: LinkOptions,
    queue: Arc<OutboundQueue>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<Stats>,
    shared: Arc<Shared>,
    connection: Mutex<Option<Connection>>,
}

impl LinkSession {
    pub fn new(transport: impl Transport, options: LinkOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport: Box::new(transport),
            options,
            queue: Arc::new(OutboundQueue::new(options.queue_policy)),
            dispatcher: Arc::new(Dispatcher::new()),
            stats: Arc::new(Stats::new()),
            shared: Arc::new(Shared {
                state: RwLock::new(LinkState::Disconnected),
                events,
            }),
            connection: Mutex::new(None),
        }
    }

    // === Lifecycle ===

    /// Open the port and start the read and write loops
    ///
    /// Items submitted while disconnected are written once the link is up.
    ///
    /// # Errors
    ///
    /// - `AlreadyOpen` - the session is not `Disconnected`
    /// - `PortUnavailable` - the transport could not open the device
    pub fn open(&self, port: &str, baud_rate: u32) -> Result<()> {
        let stale = {
            let mut slot = self.connection.lock();
            let mut state = self.shared.state.write();
            if *state != LinkState::Disconnected {
                let port = slot.as_ref().map_or(port, |c| c.port.as_str());
                return Err(LinkError::AlreadyOpen {
                    port: port.to_string(),
                });
            }
            *state = LinkState::Connecting;
            slot.take()
        };

        // Loops of a connection that failed on its own are done or about to
        // be. Joined without the slot lock: an observer still running on the
        // old read loop may call back into the session.
        if let Some(stale) = stale {
            stale.join();
        }

        let halves = match self.transport.open(port, baud_rate) {
            Ok(h) => h,
            Err(e) => {
                self.shared.set_state(LinkState::Disconnected);
                tracing::warn!(port, "Open failed: {}", e);
                return Err(e);
            }
        };

        let ctx = LoopContext {
            port: port.to_string(),
            stop: Arc::new(AtomicBool::new(false)),
            shared: self.shared.clone(),
            stats: self.stats.clone(),
            queue: self.queue.clone(),
        };

        // Held until the connection is installed so a concurrent `close`
        // sees it; nothing below blocks
        let mut slot = self.connection.lock();

        // Connected before the loops start, so an immediate failure wins
        self.shared.set_state(LinkState::Connected);
        tracing::info!(port, baud_rate, "Link connected");
        self.shared.emit(LinkEvent::Connected {
            port: port.to_string(),
        });

        let writer_ctx = ctx.clone();
        let poll = self.options.poll_interval;
        let writer = std::thread::spawn(move || write_loop(writer_ctx, halves.writer, poll));

        let reader_ctx = ctx.clone();
        let dispatcher = self.dispatcher.clone();
        let policy = self.options.length_policy;
        let reader =
            std::thread::spawn(move || read_loop(reader_ctx, halves.reader, dispatcher, policy));

        *slot = Some(Connection {
            port: ctx.port.clone(),
            stop: ctx.stop,
            threads: vec![writer, reader],
        });
        Ok(())
    }

    /// Stop both loops and release the port
    ///
    /// Pending queue items are kept for the next `open`. Safe to call at any
    /// time, from any thread, any number of times.
    pub fn close(&self) {
        let Some(conn) = self.connection.lock().take() else {
            return;
        };

        let was_active = !conn.stop.swap(true, Ordering::SeqCst);
        if was_active {
            self.shared.set_state(LinkState::Closing);
        }
        self.queue.wake();

        let port = conn.port.clone();
        conn.join();

        if was_active {
            self.shared.set_state(LinkState::Disconnected);
            tracing::info!(port = %port, pending = self.queue.len(), "Link closed");
            self.shared.emit(LinkEvent::Disconnected { port });
        }
    }

    /// Wait for every queued frame to be written, then close
    ///
    /// # Errors
    ///
    /// - `NotConnected` - the link went down before everything was written,
    ///   either with frames still pending or after a failed write
    /// - `DrainTimeout` - frames still pending after `timeout`
    ///
    /// The session is closed in every case; undelivered frames stay queued.
    pub fn drain_and_close(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let step = self.options.poll_interval.min(Duration::from_millis(5));
        let failures_before = self.stats.write_failures();

        while !self.queue.is_idle()
            && self.state() == LinkState::Connected
            && Instant::now() < deadline
        {
            std::thread::sleep(step);
        }

        let connected = self.state() == LinkState::Connected;
        self.close();

        // A failed write is completed, not requeued, so it leaves no trace
        // in the queue length
        let lost = self.stats.write_failures() - failures_before;
        let pending = self.queue.len();
        if pending == 0 && lost == 0 {
            Ok(())
        } else if !connected || lost > 0 {
            Err(LinkError::NotConnected)
        } else {
            Err(LinkError::DrainTimeout { pending })
        }
    }

    /// Close and discard every pending frame; returns how many were dropped
    pub fn abort(&self) -> usize {
        self.close();
        let dropped = self.queue.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "Discarded pending frames on abort");
        }
        dropped
    }

    // === Outbound ===

    /// Encode a frame and queue it for transmission
    ///
    /// Never blocks on the link: while disconnected the frame waits in the
    /// queue. Returns the queue sequence number.
    ///
    /// # Errors
    ///
    /// - `InvalidPayloadLength` - `payload` is not exactly 4 bytes
    /// - `QueueFull` - bounded queue with `RejectNew` policy is full
    pub fn submit_frame(
        &self,
        command: u8,
        index: [u8; 2],
        sub_index: u8,
        kind: u8,
        payload: &[u8],
    ) -> Result<u64> {
        let bytes = encode(command, index, sub_index, kind, payload)?;
        self.queue.submit(Bytes::copy_from_slice(&bytes))
    }

    /// Queue an already built frame
    pub fn send(&self, frame: &Frame) -> Result<u64> {
        self.queue.submit(Bytes::copy_from_slice(&frame.to_bytes()))
    }

    /// Queue pre-encoded bytes verbatim
    pub fn submit_raw(&self, bytes: impl Into<Bytes>) -> Result<u64> {
        self.queue.submit(bytes)
    }

    // === Inbound ===

    /// Register an observer for decoded inbound frames
    ///
    /// Subscriptions survive reconnects; they live as long as the session.
    pub fn on_frame_received(&self, observer: impl Observer + 'static) -> SubscriptionId {
        self.dispatcher.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    // === Status ===

    pub fn state(&self) -> LinkState {
        *self.shared.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Port of the current (or last failed) connection
    pub fn port(&self) -> Option<String> {
        self.connection.lock().as_ref().map(|c| c.port.clone())
    }

    /// Subscribe to connection status events
    pub fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.shared.events.subscribe()
    }

    pub fn queue(&self) -> &Arc<OutboundQueue> {
        &self.queue
    }

    pub fn options(&self) -> &LinkOptions {
        &self.options
    }

    /// Counters, including observer failures and queue evictions
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            observer_failures: self.dispatcher.failures(),
            queue_dropped: self.queue.dropped(),
            ..self.stats.snapshot()
        }
    }
}

impl Drop for LinkSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ObserverResult;
    use crate::transport::MemoryTransport;

    const SAMPLE: [u8; 10] = [0x01, 0x0A, 0x02, 0x16, 0x00, 0x00, 0x01, 0x02, 0x03, 0x04];
    const WAIT: Duration = Duration::from_secs(2);

    fn fast_options() -> LinkOptions {
        LinkOptions {
            poll_interval: Duration::from_millis(10),
            ..LinkOptions::default()
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_starts_disconnected() {
        let session = LinkSession::new(MemoryTransport::new(), fast_options());
        assert_eq!(session.state(), LinkState::Disconnected);
        assert!(session.port().is_none());
        assert_eq!(session.options().poll_interval, Duration::from_millis(10));
        assert_eq!(session.options().queue_policy, QueuePolicy::Unbounded);
    }

    #[test]
    fn test_open_and_close() {
        let device = MemoryTransport::new();
        let session = LinkSession::new(device.clone(), fast_options());
        let mut events = session.subscribe_events();

        session.open("mem0", 115_200).unwrap();
        assert_eq!(session.state(), LinkState::Connected);
        assert_eq!(
            events.try_recv().unwrap(),
            LinkEvent::Connected {
                port: "mem0".into()
            }
        );

        session.close();
        assert_eq!(session.state(), LinkState::Disconnected);
        assert_eq!(
            events.try_recv().unwrap(),
            LinkEvent::Disconnected {
                port: "mem0".into()
            }
        );

        // Idempotent
        session.close();
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_open_unavailable_port() {
        let device = MemoryTransport::new();
        device.set_unavailable(true);
        let session = LinkSession::new(device, fast_options());

        assert!(matches!(
            session.open("mem0", 115_200),
            Err(LinkError::PortUnavailable { .. })
        ));
        assert_eq!(session.state(), LinkState::Disconnected);
    }

    #[test]
    fn test_open_twice_is_rejected() {
        let session = LinkSession::new(MemoryTransport::new(), fast_options());
        session.open("mem0", 115_200).unwrap();
        match session.open("mem1", 115_200) {
            Err(LinkError::AlreadyOpen { port }) => assert_eq!(port, "mem0"),
            other => panic!("Expected AlreadyOpen, got {:?}", other),
        }
        session.close();
    }

    #[test]
    fn test_submit_writes_frame() {
        let device = MemoryTransport::new();
        let session = LinkSession::new(device.clone(), fast_options());
        session.open("mem0", 115_200).unwrap();

        session
            .submit_frame(0x01, [0x02, 0x16], 0x00, 0x00, &[0x01, 0x02, 0x03, 0x04])
            .unwrap();

        assert_eq!(device.wait_written(10, WAIT), SAMPLE);
        assert!(wait_for(|| session.stats().frames_out == 1));
        session.close();
    }

    #[test]
    fn test_submit_rejects_bad_payload() {
        let session = LinkSession::new(MemoryTransport::new(), fast_options());
        assert!(matches!(
            session.submit_frame(0x01, [0, 0], 0, 0, &[1, 2, 3]),
            Err(LinkError::InvalidPayloadLength { actual: 3, .. })
        ));
        assert!(session.queue().is_empty());
    }

    #[test]
    fn test_inbound_frames_reach_observer() {
        let device = MemoryTransport::new();
        let session = LinkSession::new(device.clone(), fast_options());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        session.on_frame_received(move |f: &Frame| -> ObserverResult {
            s.lock().push(*f);
            Ok(())
        });
        session.open("mem0", 115_200).unwrap();

        // Frame split across two reads
        assert!(device.inject(&SAMPLE[..6]));
        assert!(device.inject(&SAMPLE[6..]));

        assert!(wait_for(|| seen.lock().len() == 1));
        assert_eq!(seen.lock()[0].payload, [1, 2, 3, 4]);
        session.close();
    }

    #[test]
    fn test_observer_can_close_session() {
        let device = MemoryTransport::new();
        let session = Arc::new(LinkSession::new(device.clone(), fast_options()));

        let weak = Arc::downgrade(&session);
        session.on_frame_received(move |_: &Frame| -> ObserverResult {
            if let Some(s) = weak.upgrade() {
                s.close();
            }
            Ok(())
        });
        session.open("mem0", 115_200).unwrap();
        device.inject(&SAMPLE);

        assert!(wait_for(|| session.state() == LinkState::Disconnected));
    }

    #[test]
    fn test_abort_clears_queue() {
        let session = LinkSession::new(MemoryTransport::new(), fast_options());
        session.submit_raw(SAMPLE.to_vec()).unwrap();
        session.submit_raw(SAMPLE.to_vec()).unwrap();
        assert_eq!(session.abort(), 2);
        assert!(session.queue().is_empty());
    }

    #[test]
    fn test_drain_and_close_when_disconnected() {
        let session = LinkSession::new(MemoryTransport::new(), fast_options());
        assert!(session.drain_and_close(Duration::from_millis(10)).is_ok());

        session.submit_raw(SAMPLE.to_vec()).unwrap();
        assert!(matches!(
            session.drain_and_close(Duration::from_millis(10)),
            Err(LinkError::NotConnected)
        ));
        assert_eq!(session.queue().len(), 1);
    }

    #[test]
    fn test_link_event_json() {
        let json = serde_json::to_string(&LinkEvent::Error {
            port: "COM3".into(),
            reason: "Serial read failed".into(),
        })
        .unwrap();
        assert!(json.contains("\"event\":\"error\""));
        assert!(json.contains("COM3"));
    }
}
