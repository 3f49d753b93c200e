//! Stream decoder for the serial read path
//!
//! The device sends back-to-back 10-byte frames with no delimiter, and the
//! serial driver hands them over in arbitrary chunks. This decoder
//! accumulates bytes and emits every complete frame in arrival order.
//!
//! Resynchronization: when the buffer head fails validation, exactly one
//! byte is discarded and decoding restarts at the next position. A run of
//! consecutive discards counts as a single malformed frame.

use super::frame::{decode_with, DecodeError, Frame, LengthPolicy};
use crate::constants::FRAME_SIZE;

/// What a single `feed` call produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedOutcome {
    /// Frames emitted
    pub frames: usize,
    /// Malformed frames detected (resync episodes started)
    pub malformed: u64,
    /// Bytes discarded while resynchronizing
    pub discarded: u64,
}

/// Accumulating frame decoder
pub struct FrameStream {
    buffer: Vec<u8>,
    policy: LengthPolicy,
    /// Last decode attempt hit a malformed head
    resyncing: bool,
    malformed_total: u64,
    discarded_total: u64,
}

impl Default for FrameStream {
    fn default() -> Self {
        Self::new(LengthPolicy::Strict)
    }
}

impl FrameStream {
    pub fn new(policy: LengthPolicy) -> Self {
        Self {
            buffer: Vec::with_capacity(FRAME_SIZE * 4),
            policy,
            resyncing: false,
            malformed_total: 0,
            discarded_total: 0,
        }
    }

    /// Feed new bytes and call `on_frame` for every complete frame
    ///
    /// Bytes after the last complete frame stay buffered for the next call.
    pub fn feed(&mut self, data: &[u8], mut on_frame: impl FnMut(Frame)) -> FeedOutcome {
        self.buffer.extend_from_slice(data);

        let mut outcome = FeedOutcome::default();
        let mut pos = 0;

        loop {
            match decode_with(&self.buffer[pos..], self.policy) {
                Ok(frame) => {
                    self.resyncing = false;
                    pos += FRAME_SIZE;
                    outcome.frames += 1;
                    on_frame(frame);
                }
                Err(DecodeError::Incomplete { .. }) => break,
                Err(DecodeError::Malformed { declared_length }) => {
                    if !self.resyncing {
                        self.resyncing = true;
                        outcome.malformed += 1;
                        tracing::debug!(declared_length, "Malformed frame, resynchronizing");
                    }
                    pos += 1;
                    outcome.discarded += 1;
                }
            }
        }

        self.buffer.drain(..pos);
        self.malformed_total += outcome.malformed;
        self.discarded_total += outcome.discarded;
        outcome
    }

    /// Bytes waiting for the rest of their frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn malformed_frames(&self) -> u64 {
        self.malformed_total
    }

    pub fn discarded_bytes(&self) -> u64 {
        self.discarded_total
    }

    /// Drop any partial frame
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.resyncing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::frame::encode;

    fn frame_bytes(command: u8, mask: u32) -> [u8; FRAME_SIZE] {
        encode(command, [0x00, 0x01], 0, 0, &mask.to_le_bytes()).unwrap()
    }

    fn collect(stream: &mut FrameStream, data: &[u8]) -> (Vec<Frame>, FeedOutcome) {
        let mut frames = Vec::new();
        let outcome = stream.feed(data, |f| frames.push(f));
        (frames, outcome)
    }

    #[test]
    fn test_single_frame() {
        let mut stream = FrameStream::default();
        let (frames, outcome) = collect(&mut stream, &frame_bytes(0x01, 7));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].bitmask(), 7);
        assert_eq!(outcome.frames, 1);
        assert_eq!(stream.buffered(), 0);
    }

    #[test]
    fn test_split_across_reads() {
        let mut stream = FrameStream::default();
        let bytes = frame_bytes(0x02, 0xDEAD_BEEF);

        let (frames, _) = collect(&mut stream, &bytes[..3]);
        assert!(frames.is_empty());
        let (frames, _) = collect(&mut stream, &bytes[3..9]);
        assert!(frames.is_empty());
        assert_eq!(stream.buffered(), 9);

        let (frames, _) = collect(&mut stream, &bytes[9..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].bitmask(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_multiple_frames_and_leftover_in_one_read() {
        let mut stream = FrameStream::default();
        let mut data = Vec::new();
        data.extend_from_slice(&frame_bytes(0x01, 1));
        data.extend_from_slice(&frame_bytes(0x02, 2));
        data.extend_from_slice(&frame_bytes(0x03, 3)[..4]);

        let (frames, _) = collect(&mut stream, &data);
        assert_eq!(frames.iter().map(|f| f.command).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(stream.buffered(), 4);

        let (frames, _) = collect(&mut stream, &frame_bytes(0x03, 3)[4..]);
        assert_eq!(frames[0].command, 3);
    }

    #[test]
    fn test_resync_after_garbage_byte() {
        let mut stream = FrameStream::default();
        let mut data = vec![0xEE];
        data.extend_from_slice(&frame_bytes(0x01, 0x0403_0201));

        let (frames, outcome) = collect(&mut stream, &data);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, [0x01, 0x02, 0x03, 0x04]);
        assert_eq!(outcome.malformed, 1);
        assert_eq!(outcome.discarded, 1);
        assert_eq!(stream.buffered(), 0);
    }

    #[test]
    fn test_resync_counts_one_episode_across_reads() {
        let mut stream = FrameStream::default();
        // 12 bytes of noise: decoding is attempted on the first 3 positions
        let (_, first) = collect(&mut stream, &[0xFF; 12]);
        assert_eq!(first.malformed, 1);
        assert_eq!(first.discarded, 3);

        let mut data = vec![0xFF; 2];
        data.extend_from_slice(&frame_bytes(0x05, 5));
        let (frames, second) = collect(&mut stream, &data);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, 0x05);
        assert_eq!(second.malformed, 0);
        assert_eq!(stream.malformed_frames(), 1);
        assert_eq!(stream.discarded_bytes(), 14);
    }

    #[test]
    fn test_ignore_policy_never_resyncs() {
        let mut stream = FrameStream::new(LengthPolicy::Ignore);
        let mut bytes = frame_bytes(0x01, 1);
        bytes[1] = 0x02;
        let (frames, outcome) = collect(&mut stream, &bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(outcome.malformed, 0);
    }

    #[test]
    fn test_clear_drops_partial_frame() {
        let mut stream = FrameStream::default();
        collect(&mut stream, &frame_bytes(0x01, 1)[..5]);
        stream.clear();
        assert_eq!(stream.buffered(), 0);
        let (frames, _) = collect(&mut stream, &frame_bytes(0x02, 2));
        assert_eq!(frames[0].command, 0x02);
    }
}
