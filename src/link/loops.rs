//! Read and write loops of a connected session
//!
//! Both run on dedicated blocking threads for the life of one connection:
//! - Writer: drains the outbound queue, one frame per `write_all`
//! - Reader: reads chunks, decodes frames, publishes them
//!
//! Either loop stops when the connection's stop flag is set. A transport
//! failure sets the flag itself, so the sibling loop follows within one
//! poll interval.

use super::stats::Stats;
use super::{LinkEvent, LinkState, Shared};
use crate::codec::{FrameStream, LengthPolicy};
use crate::constants::{READ_CHUNK_SIZE, SERIAL_DISCONNECT_THRESHOLD};
use crate::dispatcher::Dispatcher;
use crate::error::LinkError;
use crate::queue::OutboundQueue;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// State one connection's loops share
#[derive(Clone)]
pub(super) struct LoopContext {
    pub port: String,
    pub stop: Arc<AtomicBool>,
    pub shared: Arc<Shared>,
    pub stats: Arc<Stats>,
    pub queue: Arc<OutboundQueue>,
}

impl LoopContext {
    #[inline]
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// End the connection after a transport failure
    ///
    /// Only the first caller (loop failure or close) wins; later failures on
    /// an already-stopping connection are not reported again.
    fn fail(&self, error: LinkError) {
        if self.stop.swap(true, Ordering::SeqCst) {
            tracing::debug!(port = %self.port, "Ignoring failure after stop: {}", error);
            return;
        }

        tracing::warn!(port = %self.port, "Link failed: {}", error);
        self.shared.set_state(LinkState::Disconnected);
        self.queue.wake();
        self.shared.emit(LinkEvent::Error {
            port: self.port.clone(),
            reason: error.to_string(),
        });
        self.shared.emit(LinkEvent::Disconnected {
            port: self.port.clone(),
        });
    }
}

/// Drain the queue into the device until stopped or a write fails
pub(super) fn write_loop(ctx: LoopContext, mut writer: Box<dyn Write + Send>, poll: Duration) {
    while !ctx.stopped() {
        let Some(item) = ctx.queue.wait_next(poll) else {
            continue;
        };

        // Close raced the dequeue: leave the frame for the next connection
        if ctx.stopped() {
            ctx.queue.restore(item);
            break;
        }

        let result = writer.write_all(&item.bytes).and_then(|_| writer.flush());
        ctx.queue.complete();

        match result {
            Ok(()) => {
                ctx.stats.add_tx(item.bytes.len());
                tracing::trace!(
                    seq = item.seq,
                    queued_us = item.enqueued_at.elapsed().as_micros() as u64,
                    "Frame written"
                );
            }
            Err(e) => {
                // Not retried: resubmitting is the caller's call
                ctx.stats.add_write_failure();
                ctx.fail(LinkError::TransportWriteFailed { source: e });
                break;
            }
        }
    }
}

/// Decode the device stream and publish frames until stopped or a read fails
pub(super) fn read_loop(
    ctx: LoopContext,
    mut reader: Box<dyn Read + Send>,
    dispatcher: Arc<Dispatcher>,
    policy: LengthPolicy,
) {
    let mut stream = FrameStream::new(policy);
    let mut buf = [0u8; READ_CHUNK_SIZE];
    let mut zero_reads = 0u32;

    while !ctx.stopped() {
        match reader.read(&mut buf) {
            Ok(n) if n > 0 => {
                zero_reads = 0;
                ctx.stats.add_rx(n);
                let outcome = stream.feed(&buf[..n], |frame| dispatcher.publish(&frame));
                ctx.stats
                    .add_decoded(outcome.frames, outcome.malformed, outcome.discarded);
            }
            Ok(_) => {
                // Zero bytes read - could be normal or port gone
                zero_reads += 1;
                if zero_reads > SERIAL_DISCONNECT_THRESHOLD {
                    ctx.stats.add_read_failure();
                    ctx.fail(LinkError::TransportReadFailed {
                        source: io::Error::new(io::ErrorKind::UnexpectedEof, "device stopped responding"),
                    });
                    break;
                }
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                zero_reads = 0;
            }
            Err(e) => {
                ctx.stats.add_read_failure();
                ctx.fail(LinkError::TransportReadFailed { source: e });
                break;
            }
        }
    }

    if stream.buffered() > 0 {
        tracing::debug!(port = %ctx.port, bytes = stream.buffered(), "Dropping partial frame");
    }
}
