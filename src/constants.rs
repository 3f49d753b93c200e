//! Application-wide constants
//!
//! Centralized constants to avoid duplication and ensure consistency.

// =============================================================================
// Wire format
// =============================================================================

/// Fixed size of every frame on the wire
pub const FRAME_SIZE: usize = 10;

/// Size of the payload field
pub const PAYLOAD_SIZE: usize = 4;

/// Value written into the `length` byte of every outgoing frame
pub const FRAME_LENGTH_BYTE: u8 = FRAME_SIZE as u8;

// =============================================================================
// Serial
// =============================================================================

/// Default baud rate for the ARES device
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial read timeout (milliseconds); bounds how long the read loop is deaf to close()
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 10;

/// Consecutive zero-byte reads before assuming port disconnected
pub const SERIAL_DISCONNECT_THRESHOLD: u32 = 10;

/// Read buffer size for a single transport read
pub const READ_CHUNK_SIZE: usize = 256;

// =============================================================================
// Timing
// =============================================================================

/// Write loop poll interval when the queue is empty (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Delay between reconnection attempts in the CLI monitor (seconds)
pub const RECONNECT_DELAY_SECS: u64 = 2;

// =============================================================================
// Buffers
// =============================================================================

/// Default capacity for bounded queue policies
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Capacity of the link event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
