//! Centralized error types for the link core
//!
//! All link errors are represented by the `LinkError` enum.
//! Use `Result<T>` as shorthand for `std::result::Result<T, LinkError>`.
//!
//! Frame decoding has its own `DecodeError` (see `codec::frame`): it never
//! leaves the read path, so it is not part of this enum.

use std::fmt;
use std::path::PathBuf;

/// All link errors
#[derive(Debug)]
pub enum LinkError {
    // === Transport ===
    /// Failed to open the serial port (missing device, permissions, busy)
    PortUnavailable {
        port: String,
        source: std::io::Error,
    },
    /// Mid-session write failure
    TransportWriteFailed { source: std::io::Error },
    /// Mid-session read failure or device gone
    TransportReadFailed { source: std::io::Error },

    // === Session ===
    /// `open` called while a connection is active or being set up
    AlreadyOpen { port: String },
    /// Operation needs a connected session
    NotConnected,
    /// `drain_and_close` gave up with items still pending
    DrainTimeout { pending: usize },

    // === Encoding / queue ===
    /// Payload handed to the encoder was not exactly 4 bytes
    InvalidPayloadLength { expected: usize, actual: usize },
    /// Bounded queue rejected a submission
    QueueFull { capacity: usize },

    // === Config ===
    /// Config file could not be read or written
    ConfigIo {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Config file is not valid TOML for this schema
    ConfigParse {
        path: PathBuf,
        source: Box<toml::de::Error>,
    },
    /// Invalid config value
    ConfigValidation { field: &'static str, reason: String },
}

impl LinkError {
    /// True for errors that end a connected session
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Self::TransportWriteFailed { .. } | Self::TransportReadFailed { .. }
        )
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::PortUnavailable { source, .. }
            | Self::TransportWriteFailed { source }
            | Self::TransportReadFailed { source }
            | Self::ConfigIo { source, .. } => Some(source),
            Self::ConfigParse { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortUnavailable { port, source } => {
                write!(f, "Cannot open serial port {}: {}", port, source)
            }
            Self::TransportWriteFailed { source } => write!(f, "Serial write failed: {}", source),
            Self::TransportReadFailed { source } => write!(f, "Serial read failed: {}", source),
            Self::AlreadyOpen { port } => write!(f, "Link already open on {}", port),
            Self::NotConnected => write!(f, "Link is not connected"),
            Self::DrainTimeout { pending } => {
                write!(f, "Timed out draining queue ({} pending)", pending)
            }
            Self::InvalidPayloadLength { expected, actual } => write!(
                f,
                "Invalid payload length: expected {} bytes, got {}",
                expected, actual
            ),
            Self::QueueFull { capacity } => write!(f, "Outbound queue full ({})", capacity),
            Self::ConfigIo { path, .. } => write!(f, "Config IO error: {}", path.display()),
            Self::ConfigParse { path, source } => {
                write!(f, "Config parse error in {}: {}", path.display(), source)
            }
            Self::ConfigValidation { field, reason } => {
                write!(f, "Invalid {}: {}", field, reason)
            }
        }
    }
}

/// Alias for Result with LinkError
pub type Result<T> = std::result::Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_port_unavailable_display_and_source() {
        let err = LinkError::PortUnavailable {
            port: "/dev/ttyUSB9".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such device"),
        };
        assert!(err.to_string().contains("/dev/ttyUSB9"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_transport_failure_classification() {
        let write = LinkError::TransportWriteFailed {
            source: std::io::Error::from(std::io::ErrorKind::BrokenPipe),
        };
        let full = LinkError::QueueFull { capacity: 4 };
        assert!(write.is_transport_failure());
        assert!(!full.is_transport_failure());
        assert!(full.source().is_none());
    }

    #[test]
    fn test_invalid_payload_length_display() {
        let err = LinkError::InvalidPayloadLength {
            expected: 4,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "Invalid payload length: expected 4 bytes, got 3"
        );
    }
}
