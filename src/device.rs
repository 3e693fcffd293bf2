//! Device channel
//!
//! Wraps a [`Connector`] with the reconnect state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Faulted -> Connecting -> ...
//! ```
//!
//! There is no terminal state while the channel is in use. Every connect
//! failure and every write error lands in `Faulted`; the next `open()` walks
//! back through `Connecting`.

use std::time::Duration;

use ambient_transport::{
    BoxedConnector, Handshake, Link, SerialConnector, TcpConnector, TransportError, TransportKind,
};
use tracing::{debug, error, info, warn};

use crate::color::Color;
use crate::config::StripConfig;

/// Fixed delay between connection attempts
pub const RETRY_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Faulted,
}

/// Counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub connect_attempts: u64,
    /// Failed connects plus failed writes
    pub faults: u64,
    /// `Faulted -> Connecting` transitions
    pub reconnects: u64,
    pub frames: u64,
    pub blank_frames: u64,
}

/// Byte sink for one strip controller
pub struct DeviceChannel {
    connector: BoxedConnector,
    link: Option<Box<dyn Link>>,
    state: ChannelState,
    leds: usize,
    /// Reused for every frame
    send_buf: Vec<u8>,
    retry_delay: Duration,
    stats: ChannelStats,
}

impl DeviceChannel {
    pub fn new(connector: BoxedConnector, leds: usize) -> Self {
        Self {
            connector,
            link: None,
            state: ChannelState::Disconnected,
            leds,
            send_buf: Vec::with_capacity(leds * 3),
            retry_delay: RETRY_DELAY,
            stats: ChannelStats::default(),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ChannelState::Connected
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    pub fn address(&self) -> &str {
        self.connector.address()
    }

    fn set_state(&mut self, next: ChannelState) {
        if self.state == next {
            return;
        }
        if self.state == ChannelState::Faulted && next == ChannelState::Connecting {
            self.stats.reconnects += 1;
        }
        debug!(address = %self.connector.address(), "Channel {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Drop the link after an error
    fn fault(&mut self) {
        self.stats.faults += 1;
        if let Some(link) = self.link.take() {
            if let Err(e) = link.close() {
                debug!(address = %self.connector.address(), "Closing faulted link: {e}");
            }
        }
        self.set_state(ChannelState::Faulted);
    }

    /// Make one connection attempt
    pub fn try_open(&mut self) -> Result<(), TransportError> {
        if self.link.is_some() {
            return Ok(());
        }

        self.set_state(ChannelState::Connecting);
        self.stats.connect_attempts += 1;
        match self.connector.connect() {
            Ok(link) => {
                self.link = Some(link);
                self.set_state(ChannelState::Connected);
                info!(address = %self.connector.address(), "Controller connected");
                Ok(())
            }
            Err(e) => {
                self.fault();
                Err(e)
            }
        }
    }

    /// Connect, retrying every `retry_delay` until it works
    ///
    /// `cancelled` is checked before every attempt; returns false if it
    /// stopped the loop. Errors that no retry can fix, like a malformed
    /// address, are reported once at `error` and retried all the same.
    pub fn open(&mut self, cancelled: impl Fn() -> bool) -> bool {
        let mut failures = 0u64;
        let mut reported_permanent = false;
        loop {
            if cancelled() {
                return false;
            }
            match self.try_open() {
                Ok(()) => {
                    if failures > 0 {
                        info!(
                            address = %self.connector.address(),
                            failures, "Controller reachable again"
                        );
                    }
                    return true;
                }
                Err(e) => {
                    failures += 1;
                    if !e.is_transient() {
                        if !reported_permanent {
                            error!(
                                address = %self.connector.address(),
                                "Cannot connect: {e}, fix the configuration"
                            );
                            reported_permanent = true;
                        }
                    } else if failures == 1 {
                        warn!(address = %self.connector.address(), "Cannot connect: {e}, retrying");
                    } else {
                        debug!(address = %self.connector.address(), failures, "Connect failed: {e}");
                    }
                }
            }
            std::thread::sleep(self.retry_delay);
        }
    }

    /// Send `colors[offset..offset + length]` as one R,G,B frame
    pub fn write(
        &mut self,
        colors: &[Color],
        offset: usize,
        length: usize,
    ) -> Result<(), TransportError> {
        let Some(link) = self.link.as_mut() else {
            return Err(TransportError::Disconnected);
        };

        let end = (offset + length).min(colors.len());
        self.send_buf.clear();
        for color in &colors[offset.min(end)..end] {
            self.send_buf.extend_from_slice(&[color.r(), color.g(), color.b()]);
        }

        match link.write_frame(&self.send_buf) {
            Ok(()) => {
                self.stats.frames += 1;
                Ok(())
            }
            Err(e) => {
                warn!(address = %self.connector.address(), "Write failed: {e}");
                self.fault();
                Err(e)
            }
        }
    }

    /// Blank the strip and release the transport
    ///
    /// The channel ends up `Disconnected` even when blanking or closing fails;
    /// the first error is returned.
    pub fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut link) = self.link.take() else {
            self.set_state(ChannelState::Disconnected);
            return Ok(());
        };

        self.send_buf.clear();
        self.send_buf.resize(self.leds * 3, 0);
        let blank = link.write_frame(&self.send_buf);
        if blank.is_ok() {
            self.stats.blank_frames += 1;
        }
        let closed = link.close();
        self.set_state(ChannelState::Disconnected);
        debug!(address = %self.connector.address(), "Channel closed");
        blank.and(closed)
    }
}

impl Drop for DeviceChannel {
    fn drop(&mut self) {
        if self.link.is_some() {
            if let Err(e) = self.close() {
                debug!("Closing dropped channel: {e}");
            }
        }
    }
}

/// Source of connectors, injected into the registry
pub trait ConnectorFactory: Send + Sync {
    fn connector(&self, strip: &StripConfig) -> BoxedConnector;
}

/// Real serial and TCP controllers
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConnectors;

impl ConnectorFactory for SystemConnectors {
    fn connector(&self, strip: &StripConfig) -> BoxedConnector {
        connector_for(strip)
    }
}

/// Build the connector a strip configuration asks for
pub fn connector_for(strip: &StripConfig) -> BoxedConnector {
    let preamble = strip
        .header
        .then(|| strip.controller_header().encode(strip.kind).to_vec());

    match strip.kind {
        TransportKind::Tcp => {
            let connector = TcpConnector::new(strip.address());
            match preamble {
                Some(p) => Box::new(connector.with_preamble(p)),
                None => Box::new(connector),
            }
        }
        TransportKind::Serial => {
            let handshake = if strip.handshake {
                Handshake::Reset
            } else {
                Handshake::None
            };
            let connector = SerialConnector::new(strip.address(), strip.baud, handshake);
            match preamble {
                Some(p) => Box::new(connector.with_preamble(p)),
                None => Box::new(connector),
            }
        }
    }
}
