//! Frame codec for the ARES serial protocol
//!
//! Separates encoding concerns from transport:
//! - **frame**: the fixed 10-byte wire format (pure encode/decode, no state)
//! - **stream**: accumulating decoder used by the read loop (partial reads,
//!   resynchronization after malformed data)
//!
//! Neither part does I/O; the link session feeds bytes in and takes frames out.

pub mod frame;
pub mod stream;

pub use frame::{decode, decode_with, encode, DecodeError, Frame, LengthPolicy};
pub use stream::{FeedOutcome, FrameStream};
