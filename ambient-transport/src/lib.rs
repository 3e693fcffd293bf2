//! Transport layer for ambient LED strip controllers
//!
//! This crate provides a unified byte-sink interface for the controller
//! classes the driver talks to:
//!
//! - Serial (Arduino-class controllers on a USB CDC port)
//! - TCP (Raspberry Pi-class controllers on the local network)
//!
//! A [`Connector`] knows how to reach one configured address and hands out
//! [`Link`]s. Links are plain blocking sinks: every call to
//! [`Link::write_frame`] puts one complete frame on the wire.

pub mod error;
pub mod header;
pub mod types;

mod serial;
mod tcp;

pub use error::TransportError;
pub use header::ControllerHeader;
pub use serial::{find_port, list_ports, SerialConnector, DEFAULT_BAUD_RATE};
pub use tcp::TcpConnector;
pub use types::{Handshake, TransportKind};

/// An open connection to a controller
///
/// Implementations are synchronous; they are driven from blocking worker
/// threads, never from an async executor.
pub trait Link: Send {
    /// Write one complete frame
    ///
    /// Serial implementations flush after the write so the frame leaves the
    /// OS buffer before the next tick.
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Release the underlying handle
    fn close(self: Box<Self>) -> Result<(), TransportError>;
}

/// Opens links to one configured controller address
pub trait Connector: Send {
    /// Make a single connection attempt
    ///
    /// Retrying is the caller's business; a connector never loops on its own
    /// beyond a bounded handshake.
    fn connect(&mut self) -> Result<Box<dyn Link>, TransportError>;

    /// Human-readable address (port name or `ip:port`) for logs
    fn address(&self) -> &str;
}

/// Type alias for a boxed connector
pub type BoxedConnector = Box<dyn Connector>;
