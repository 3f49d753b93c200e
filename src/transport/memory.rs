//! In-memory loopback transport (simulated device)
//!
//! Stands in for the serial port when no ARES hardware is attached:
//! - `--virtual` mode of the CLI (device echoes every frame back)
//! - integration tests (inject device bytes, inspect written bytes,
//!   unplug the device, make writes fail)
//!
//! Each `open` creates a fresh pair of channels. The device end of the most
//! recent connection is kept inside the transport so the simulation methods
//! always act on the live link.

use super::{Transport, TransportHalves};
use crate::codec::FrameStream;
use crate::constants::DEFAULT_READ_TIMEOUT_MS;
use crate::error::{LinkError, Result};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Device side of a live memory link
struct DeviceEnd {
    to_host: Sender<Vec<u8>>,
    from_host: Receiver<Vec<u8>>,
    /// Bytes already pulled from `from_host`
    received: Vec<u8>,
}

#[derive(Default)]
struct Shared {
    device: Mutex<Option<DeviceEnd>>,
    unavailable: AtomicBool,
    fail_writes: AtomicBool,
    /// Per-write delay in milliseconds (slow device)
    write_delay_ms: AtomicU64,
    opens: AtomicU64,
}

/// Loopback transport with a scriptable device end
///
/// Cloning yields another handle to the same simulated device.
#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
    echo: bool,
    read_timeout: Duration,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Silent device: only sends what is injected
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            echo: false,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
        }
    }

    /// Device that answers every complete frame with the same frame
    pub fn echo() -> Self {
        Self {
            echo: true,
            ..Self::new()
        }
    }

    /// Make the next `open` calls fail with `PortUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make host writes fail (the device stops accepting data)
    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every host write take `delay` before it is accepted
    pub fn set_write_delay(&self, delay: Duration) {
        self.shared
            .write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Successful `open` calls so far
    pub fn open_count(&self) -> u64 {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// True while a link is plugged in
    pub fn is_plugged(&self) -> bool {
        self.shared.device.lock().is_some()
    }

    /// Send bytes from the device to the host; false when nothing is plugged in
    pub fn inject(&self, bytes: &[u8]) -> bool {
        match self.shared.device.lock().as_ref() {
            Some(device) => device.to_host.send(bytes.to_vec()).is_ok(),
            None => false,
        }
    }

    /// Simulate pulling the cable: both host halves start failing
    pub fn unplug(&self) {
        self.shared.device.lock().take();
    }

    /// Everything the host has written on the current link so far
    pub fn written(&self) -> Vec<u8> {
        let mut guard = self.shared.device.lock();
        match guard.as_mut() {
            Some(device) => {
                while let Ok(chunk) = device.from_host.try_recv() {
                    device.received.extend_from_slice(&chunk);
                }
                device.received.clone()
            }
            None => Vec::new(),
        }
    }

    /// Wait until the host has written at least `len` bytes on the current link
    ///
    /// Returns whatever was written when `timeout` expires.
    pub fn wait_written(&self, len: usize, timeout: Duration) -> Vec<u8> {
        let deadline = Instant::now() + timeout;
        loop {
            let written = self.written();
            if written.len() >= len || Instant::now() >= deadline {
                return written;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

impl Transport for MemoryTransport {
    fn open(&self, port: &str, _baud_rate: u32) -> Result<TransportHalves> {
        if self.shared.unavailable.load(Ordering::SeqCst) {
            return Err(LinkError::PortUnavailable {
                port: port.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "simulated device unavailable"),
            });
        }

        let (to_host, host_rx) = mpsc::channel::<Vec<u8>>();
        let (host_tx, from_host) = mpsc::channel::<Vec<u8>>();

        let echo = self.echo.then(|| (to_host.clone(), FrameStream::default()));

        *self.shared.device.lock() = Some(DeviceEnd {
            to_host,
            from_host,
            received: Vec::new(),
        });
        self.shared.opens.fetch_add(1, Ordering::SeqCst);

        Ok(TransportHalves {
            reader: Box::new(ChannelReader {
                rx: host_rx,
                pending: Vec::new(),
                timeout: self.read_timeout,
            }),
            writer: Box::new(ChannelWriter {
                tx: host_tx,
                echo,
                shared: self.shared.clone(),
            }),
        })
    }
}

struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    /// Rest of a chunk that did not fit the caller's buffer
    pending: Vec<u8>,
    timeout: Duration,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(self.timeout) {
                Ok(chunk) => self.pending = chunk,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "simulated device unplugged",
                    ))
                }
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

struct ChannelWriter {
    tx: Sender<Vec<u8>>,
    echo: Option<(Sender<Vec<u8>>, FrameStream)>,
    shared: Arc<Shared>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated write failure"));
        }

        let delay = self.shared.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }

        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "simulated device unplugged"))?;

        if let Some((reply, stream)) = self.echo.as_mut() {
            stream.feed(buf, |frame| {
                let _ = reply.send(frame.to_bytes().to_vec());
            });
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
