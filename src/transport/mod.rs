//! Transport abstraction for byte-level I/O
//!
//! Separates I/O concerns from protocol logic:
//! - **Transport**: how bytes flow (serial port, in-memory loopback)
//! - **Codec**: how frames are encoded/decoded (handled separately)
//!
//! A transport only opens the device and hands back a reader and a writer.
//! The link session owns both halves exclusively and runs its own blocking
//! read and write threads on them.
//!
//! # Reader contract
//!
//! - `read` blocks for at most a short timeout and returns an error of kind
//!   `TimedOut` (or `WouldBlock`) when nothing arrived, so the read loop can
//!   observe a close request promptly
//! - any other error means the device is gone
//!
//! # Writer contract
//!
//! `write_all` + `flush` either succeed for the whole frame or the frame is
//! treated as failed.

pub mod memory;
pub mod serial;

pub use memory::MemoryTransport;
pub use serial::{PortInfo, SerialTransport};

use crate::error::Result;
use std::io::{Read, Write};

/// The two independently owned halves of an open device
pub struct TransportHalves {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

/// Something that can open a device by name
///
/// # Example
///
/// ```ignore
/// let transport = SerialTransport::default();
/// let halves = transport.open("/dev/ttyUSB0", 115_200)?;
/// ```
pub trait Transport: Send + Sync + 'static {
    /// Open the device
    ///
    /// # Errors
    ///
    /// Returns `PortUnavailable` if the device cannot be opened
    /// (missing, permissions, already in use).
    fn open(&self, port: &str, baud_rate: u32) -> Result<TransportHalves>;
}
