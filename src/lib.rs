//! ARES link - host-side serial link for the ARES LED panel
//!
//! Frames are fixed 10-byte records exchanged over a serial port. The crate
//! provides the codec, an outbound FIFO that accepts frames whether or not
//! the device is connected, a session that owns the port and its read/write
//! loops, and a dispatcher that fans decoded frames out to observers.

pub mod codec;
pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod link;
pub mod logging;
pub mod queue;
pub mod transport;

pub use codec::{decode, encode, Frame, LengthPolicy};
pub use dispatcher::{Observer, ObserverResult, SubscriptionId};
pub use error::{LinkError, Result};
pub use link::stats::StatsSnapshot;
pub use link::{LinkEvent, LinkOptions, LinkSession, LinkState};
pub use queue::{OutboundQueue, QueuePolicy};
pub use transport::{MemoryTransport, SerialTransport, Transport};
