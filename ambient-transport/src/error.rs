//! Transport error types

use thiserror::Error;

/// Errors that can occur during transport operations
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Serial port not found: {0}")]
    PortNotFound(String),

    #[error("Serial error: {0}")]
    Serial(String),

    #[error("Serial permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serialport::Error> for TransportError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::NoDevice => TransportError::PortNotFound(e.description),
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                TransportError::PermissionDenied(e.description)
            }
            _ => TransportError::Serial(e.description),
        }
    }
}

impl TransportError {
    /// Whether retrying the same operation later can plausibly succeed
    ///
    /// Everything except a malformed address is considered transient: ports
    /// appear when a device is plugged in, hosts come back on the network.
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::InvalidAddress(_))
    }
}
