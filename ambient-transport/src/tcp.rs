//! TCP transport for Raspberry Pi-class controllers
//!
//! The stream is unframed: the controller infers the LED index from the byte
//! position, so every write must be a whole frame.

use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::TransportError;
use crate::{Connector, Link};

/// Connect timeout for a single attempt
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Blocking write timeout for a single frame
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connector for a TCP controller
pub struct TcpConnector {
    address: String,
    preamble: Option<Vec<u8>>,
}

impl TcpConnector {
    /// Create a connector for `host:port`
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            preamble: None,
        }
    }

    /// Bytes written once after every successful connect (e.g. a header)
    pub fn with_preamble(mut self, preamble: Vec<u8>) -> Self {
        self.preamble = Some(preamble);
        self
    }

    fn resolve(&self) -> Result<SocketAddr, TransportError> {
        self.address
            .to_socket_addrs()
            .map_err(|e| TransportError::InvalidAddress(format!("{}: {e}", self.address)))?
            .next()
            .ok_or_else(|| TransportError::InvalidAddress(self.address.clone()))
    }
}

impl Connector for TcpConnector {
    fn connect(&mut self) -> Result<Box<dyn Link>, TransportError> {
        let addr = self.resolve()?;
        let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

        if let Some(ref preamble) = self.preamble {
            stream.write_all(preamble)?;
        }

        info!(%addr, "TCP link open");
        Ok(Box::new(TcpLink { stream, addr }))
    }

    fn address(&self) -> &str {
        &self.address
    }
}

struct TcpLink {
    stream: TcpStream,
    addr: SocketAddr,
}

impl Link for TcpLink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(frame)?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), TransportError> {
        debug!(addr = %self.addr, "Closing TCP link");
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != std::io::ErrorKind::NotConnected => Err(e.into()),
            _ => Ok(()),
        }
    }
}
