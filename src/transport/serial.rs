//! Serial transport backed by the `serialport` crate
//!
//! The port is opened once and cloned so the read and write threads each
//! own a handle. The read timeout is kept short: it bounds how long the read
//! loop takes to notice a close request.

use super::{Transport, TransportHalves};
use crate::constants::DEFAULT_READ_TIMEOUT_MS;
use crate::error::{LinkError, Result};
use serde::Serialize;
use serialport::SerialPortType;
use std::time::Duration;

/// Serial port transport
///
/// # Example
///
/// ```ignore
/// let transport = SerialTransport::new(Duration::from_millis(10));
/// let session = LinkSession::new(transport, LinkOptions::default());
/// session.open("COM3", 115_200)?;
/// ```
pub struct SerialTransport {
    read_timeout: Duration,
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_READ_TIMEOUT_MS))
    }
}

impl SerialTransport {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}

impl Transport for SerialTransport {
    fn open(&self, port: &str, baud_rate: u32) -> Result<TransportHalves> {
        let map_err = |e: serialport::Error| LinkError::PortUnavailable {
            port: port.to_string(),
            source: std::io::Error::other(e.to_string()),
        };

        let reader = serialport::new(port, baud_rate)
            .timeout(self.read_timeout)
            .open()
            .map_err(map_err)?;
        let writer = reader.try_clone().map_err(map_err)?;

        tracing::debug!(port, baud_rate, "Serial port opened");

        Ok(TransportHalves {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }
}

/// A serial port as reported by the OS
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub name: String,
    /// "usb", "pci", "bluetooth" or "unknown"
    pub kind: &'static str,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub product: Option<String>,
}

impl PortInfo {
    fn from_serialport(info: serialport::SerialPortInfo) -> Self {
        let (kind, vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb) => ("usb", Some(usb.vid), Some(usb.pid), usb.product),
            SerialPortType::PciPort => ("pci", None, None, None),
            SerialPortType::BluetoothPort => ("bluetooth", None, None, None),
            SerialPortType::Unknown => ("unknown", None, None, None),
        };
        Self {
            name: info.port_name,
            kind,
            vid,
            pid,
            product,
        }
    }
}

/// List serial ports present on this machine
///
/// Enumeration failures yield an empty list; there is nothing to pick from
/// either way.
pub fn list_ports() -> Vec<PortInfo> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(PortInfo::from_serialport).collect(),
        Err(e) => {
            tracing::warn!("Serial port enumeration failed: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_read_timeout() {
        let transport = SerialTransport::default();
        assert_eq!(
            transport.read_timeout(),
            Duration::from_millis(DEFAULT_READ_TIMEOUT_MS)
        );
    }

    #[test]
    fn test_open_missing_port_is_unavailable() {
        let transport = SerialTransport::default();
        match transport.open("/dev/ares-link-does-not-exist", 115_200) {
            Err(LinkError::PortUnavailable { port, .. }) => {
                assert_eq!(port, "/dev/ares-link-does-not-exist")
            }
            Err(other) => panic!("Expected PortUnavailable, got {:?}", other),
            Ok(_) => panic!("Expected PortUnavailable, port opened"),
        }
    }

    #[test]
    fn test_port_info_from_usb() {
        let info = serialport::SerialPortInfo {
            port_name: "/dev/ttyACM0".into(),
            port_type: SerialPortType::UsbPort(serialport::UsbPortInfo {
                vid: 0x16C0,
                pid: 0x0483,
                serial_number: None,
                manufacturer: None,
                product: Some("ARES".into()),
            }),
        };
        let port = PortInfo::from_serialport(info);
        assert_eq!(port.kind, "usb");
        assert_eq!(port.vid, Some(0x16C0));
        assert_eq!(port.product.as_deref(), Some("ARES"));
    }
}
