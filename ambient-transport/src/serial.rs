//! Serial transport for Arduino-class controllers
//!
//! Frames are raw `leds * 3` byte RGB runs with a flush after each one. The
//! controller resets when the port opens, so the connector waits for it to
//! come back with the reset handshake before the first frame.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::{SerialPort, SerialPortType};
use tracing::{debug, info};

use crate::error::TransportError;
use crate::types::Handshake;
use crate::{Connector, Link};

/// Baud rate the Arduino firmware is built for
pub const DEFAULT_BAUD_RATE: u32 = 460_800;

/// Marker repeated until the controller acknowledges
const RESET_MARKER: &[u8] = b"RESET!!!";

/// Delay between reset markers
const HANDSHAKE_INTERVAL: Duration = Duration::from_millis(100);

/// Give up on one handshake after this many markers (5 s) and let the
/// caller's reconnect loop start over with a fresh port.
const HANDSHAKE_ATTEMPTS: u32 = 50;

/// Blocking write timeout for a single frame
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Find a serial port by case-insensitive substring
///
/// Matches against the port name (`/dev/ttyACM0`, `COM3`) and, for USB ports,
/// the product and manufacturer strings, so configs can say `"arduino"`.
pub fn find_port(name: &str) -> Result<String, TransportError> {
    let needle = name.to_lowercase();
    let ports = serialport::available_ports()?;

    for port in ports {
        if port.port_name.to_lowercase().contains(&needle) {
            return Ok(port.port_name);
        }

        if let SerialPortType::UsbPort(ref usb) = port.port_type {
            let described = [usb.product.as_deref(), usb.manufacturer.as_deref()]
                .into_iter()
                .flatten()
                .any(|s| s.to_lowercase().contains(&needle));
            if described {
                return Ok(port.port_name);
            }
        }
    }

    Err(TransportError::PortNotFound(name.to_string()))
}

/// Serial ports present on the system as `(name, description)`
///
/// The description is the USB product string when there is one.
pub fn list_ports() -> Result<Vec<(String, String)>, TransportError> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|port| {
            let description = match port.port_type {
                SerialPortType::UsbPort(usb) => usb
                    .product
                    .or(usb.manufacturer)
                    .unwrap_or_else(|| format!("USB {:04x}:{:04x}", usb.vid, usb.pid)),
                SerialPortType::PciPort => "PCI".to_string(),
                SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                SerialPortType::Unknown => String::new(),
            };
            (port.port_name, description)
        })
        .collect())
}

/// Connector for a serial controller
pub struct SerialConnector {
    name: String,
    baud: u32,
    handshake: Handshake,
    preamble: Option<Vec<u8>>,
}

impl SerialConnector {
    /// Create a connector for the port matching `name`
    pub fn new(name: impl Into<String>, baud: u32, handshake: Handshake) -> Self {
        Self {
            name: name.into(),
            baud,
            handshake,
            preamble: None,
        }
    }

    /// Bytes written once after every successful connect (e.g. a header)
    pub fn with_preamble(mut self, preamble: Vec<u8>) -> Self {
        self.preamble = Some(preamble);
        self
    }
}

impl Connector for SerialConnector {
    fn connect(&mut self) -> Result<Box<dyn Link>, TransportError> {
        let path = find_port(&self.name)?;
        let mut port = serialport::new(&path, self.baud)
            .timeout(WRITE_TIMEOUT)
            .open()?;

        if self.handshake == Handshake::Reset {
            reset_handshake(port.as_mut())?;
        }

        if let Some(ref preamble) = self.preamble {
            port.write_all(preamble)?;
            port.flush()?;
        }

        info!(port = %path, baud = self.baud, "Serial link open");
        Ok(Box::new(SerialLink { port, path }))
    }

    fn address(&self) -> &str {
        &self.name
    }
}

/// Repeat the reset marker until the controller sends anything back
fn reset_handshake(port: &mut dyn SerialPort) -> Result<(), TransportError> {
    for attempt in 0..HANDSHAKE_ATTEMPTS {
        port.write_all(RESET_MARKER)?;
        port.flush()?;
        std::thread::sleep(HANDSHAKE_INTERVAL);

        let pending = port.bytes_to_read()?;
        if pending > 0 {
            // Drain the acknowledgement so it isn't mistaken for data later
            let mut ack = vec![0u8; pending as usize];
            port.read_exact(&mut ack)?;
            debug!(attempt, "Controller acknowledged reset");
            return Ok(());
        }
    }

    Err(TransportError::Handshake(format!(
        "no answer after {HANDSHAKE_ATTEMPTS} reset markers"
    )))
}

struct SerialLink {
    port: Box<dyn SerialPort>,
    path: String,
}

impl Link for SerialLink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(frame)?;
        self.port.flush()?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), TransportError> {
        debug!(port = %self.path, "Closing serial link");
        // The port handle closes on drop
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_missing_port() {
        // Passes with or without hardware attached; nothing is named like this
        let result = find_port("no-such-controller-7f3a");
        assert!(matches!(
            result,
            Err(TransportError::PortNotFound(_)) | Err(TransportError::Serial(_))
        ));
    }

    #[test]
    fn test_connector_address() {
        let connector = SerialConnector::new("ttyACM", DEFAULT_BAUD_RATE, Handshake::None);
        assert_eq!(connector.address(), "ttyACM");
    }

    #[test]
    #[ignore] // requires an Arduino controller
    fn test_connect_arduino() {
        let mut connector = SerialConnector::new("arduino", DEFAULT_BAUD_RATE, Handshake::Reset);
        let mut link = connector.connect().unwrap();
        link.write_frame(&[0u8; 3 * 60]).unwrap();
        link.close().unwrap();
    }
}
