//! ARES frame wire format
//!
//! Every frame is exactly 10 bytes, no delimiter, no escaping:
//!
//! ```text
//! ┌─────────┬────────┬──────────┬───────────┬──────┬───────────────┐
//! │ command │ length │ index    │ sub_index │ type │ payload       │
//! │ (1B)    │ (1B)   │ (2B raw) │ (1B)      │ (1B) │ (4B raw)      │
//! └─────────┴────────┴──────────┴───────────┴──────┴───────────────┘
//! ```
//!
//! Multi-byte fields are carried as verbatim byte arrays. The only
//! validation is the `length` byte, which must equal the frame size under
//! [`LengthPolicy::Strict`].

use crate::constants::{FRAME_LENGTH_BYTE, FRAME_SIZE, PAYLOAD_SIZE};
use crate::error::{LinkError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the decoder treats the `length` byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthPolicy {
    /// Reject frames whose `length` byte is not the frame size
    #[default]
    Strict,
    /// Accept any `length` byte (legacy devices that write other values)
    Ignore,
}

/// A decoded or ready-to-send frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frame {
    pub command: u8,
    /// Declared length as seen on the wire
    pub length: u8,
    pub index: [u8; 2],
    pub sub_index: u8,
    /// Frame kind discriminator (`type` on the wire)
    pub kind: u8,
    pub payload: [u8; PAYLOAD_SIZE],
}

impl Frame {
    /// Build an outgoing frame; `length` is set to the frame size
    pub fn new(command: u8, index: [u8; 2], sub_index: u8, kind: u8, payload: [u8; 4]) -> Self {
        Self {
            command,
            length: FRAME_LENGTH_BYTE,
            index,
            sub_index,
            kind,
            payload,
        }
    }

    /// Build an outgoing frame carrying a 32-bit mask
    ///
    /// Bit `n` lands in payload byte `n / 8`, bit `n % 8` (little-endian),
    /// which is the layout the panel's toggle grid produces.
    pub fn with_bitmask(command: u8, index: [u8; 2], sub_index: u8, kind: u8, mask: u32) -> Self {
        Self::new(command, index, sub_index, kind, mask.to_le_bytes())
    }

    /// Payload interpreted as a 32-bit mask (see [`Frame::with_bitmask`])
    pub fn bitmask(&self) -> u32 {
        u32::from_le_bytes(self.payload)
    }

    /// State of bit `n` of the payload mask; bits past 31 are always off
    pub fn bit(&self, n: u32) -> bool {
        n < 32 && (self.bitmask() >> n) & 1 == 1
    }

    /// Serialize exactly as it goes on the wire
    pub fn to_bytes(&self) -> [u8; FRAME_SIZE] {
        let mut out = [0u8; FRAME_SIZE];
        out[0] = self.command;
        out[1] = self.length;
        out[2..4].copy_from_slice(&self.index);
        out[4] = self.sub_index;
        out[5] = self.kind;
        out[6..10].copy_from_slice(&self.payload);
        out
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes();
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

/// Why a buffer head could not be turned into a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer than 10 bytes available; buffer and retry
    Incomplete { available: usize },
    /// 10 bytes available but the `length` byte does not match
    Malformed { declared_length: u8 },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete { available } => {
                write!(f, "Incomplete frame: {} of {} bytes", available, FRAME_SIZE)
            }
            Self::Malformed { declared_length } => write!(
                f,
                "Malformed frame: declared length {} (expected {})",
                declared_length, FRAME_SIZE
            ),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Encode frame fields into wire bytes
///
/// `payload` must be exactly 4 bytes; anything else is rejected rather than
/// padded or truncated.
pub fn encode(
    command: u8,
    index: [u8; 2],
    sub_index: u8,
    kind: u8,
    payload: &[u8],
) -> Result<[u8; FRAME_SIZE]> {
    let payload: [u8; PAYLOAD_SIZE] =
        payload
            .try_into()
            .map_err(|_| LinkError::InvalidPayloadLength {
                expected: PAYLOAD_SIZE,
                actual: payload.len(),
            })?;
    Ok(Frame::new(command, index, sub_index, kind, payload).to_bytes())
}

/// Decode the head of `bytes` with strict length validation
///
/// Only the first 10 bytes are inspected; trailing bytes are left to the caller.
pub fn decode(bytes: &[u8]) -> std::result::Result<Frame, DecodeError> {
    decode_with(bytes, LengthPolicy::Strict)
}

/// Decode the head of `bytes` with an explicit length policy
pub fn decode_with(bytes: &[u8], policy: LengthPolicy) -> std::result::Result<Frame, DecodeError> {
    if bytes.len() < FRAME_SIZE {
        return Err(DecodeError::Incomplete {
            available: bytes.len(),
        });
    }

    let length = bytes[1];
    if policy == LengthPolicy::Strict && length != FRAME_LENGTH_BYTE {
        return Err(DecodeError::Malformed {
            declared_length: length,
        });
    }

    Ok(Frame {
        command: bytes[0],
        length,
        index: [bytes[2], bytes[3]],
        sub_index: bytes[4],
        kind: bytes[5],
        payload: [bytes[6], bytes[7], bytes[8], bytes[9]],
    })
}
