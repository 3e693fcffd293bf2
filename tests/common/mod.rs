//! Shared mocks for integration tests: a recording controller transport and
//! a capture backend that can be told to fail.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ambient_led::capture::{
    CaptureBackend, CaptureError, CaptureRegion, CaptureSession, PixelFormat, PixelFrame,
};
use ambient_led::color::Color;
use ambient_led::config::{InstanceConfig, StripConfig};
use ambient_led::device::ConnectorFactory;
use ambient_led::transport::{BoxedConnector, Connector, Link, TransportError};
use parking_lot::Mutex;

/// What a controller saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wire {
    Connect(String),
    ConnectFailed(String),
    Frame(String, Vec<u8>),
    Close(String),
}

impl Wire {
    pub fn address(&self) -> &str {
        match self {
            Wire::Connect(a) | Wire::ConnectFailed(a) | Wire::Frame(a, _) | Wire::Close(a) => a,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Wire::Frame(_, f) if f.iter().all(|&b| b == 0))
    }
}

/// Controllers that record everything into one ordered log
#[derive(Default)]
pub struct RecordingControllers {
    log: Arc<Mutex<Vec<Wire>>>,
    failures: Arc<Mutex<HashMap<String, usize>>>,
}

impl RecordingControllers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Refuse the next `count` connects to `address`
    pub fn fail_connects(&self, address: &str, count: usize) {
        self.failures.lock().insert(address.to_string(), count);
    }

    pub fn log(&self) -> Vec<Wire> {
        self.log.lock().clone()
    }

    /// Log entries for one address
    pub fn log_for(&self, address: &str) -> Vec<Wire> {
        self.log
            .lock()
            .iter()
            .filter(|w| w.address() == address)
            .cloned()
            .collect()
    }
}

impl ConnectorFactory for RecordingControllers {
    fn connector(&self, strip: &StripConfig) -> BoxedConnector {
        Box::new(RecordingConnector {
            address: strip.address(),
            log: self.log.clone(),
            failures: self.failures.clone(),
        })
    }
}

struct RecordingConnector {
    address: String,
    log: Arc<Mutex<Vec<Wire>>>,
    failures: Arc<Mutex<HashMap<String, usize>>>,
}

impl Connector for RecordingConnector {
    fn connect(&mut self) -> Result<Box<dyn Link>, TransportError> {
        if let Some(left) = self.failures.lock().get_mut(&self.address) {
            if *left > 0 {
                *left -= 1;
                self.log.lock().push(Wire::ConnectFailed(self.address.clone()));
                return Err(TransportError::Io(
                    std::io::ErrorKind::ConnectionRefused.into(),
                ));
            }
        }
        self.log.lock().push(Wire::Connect(self.address.clone()));
        Ok(Box::new(RecordingLink {
            address: self.address.clone(),
            log: self.log.clone(),
        }))
    }

    fn address(&self) -> &str {
        &self.address
    }
}

struct RecordingLink {
    address: String,
    log: Arc<Mutex<Vec<Wire>>>,
}

impl Link for RecordingLink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.log
            .lock()
            .push(Wire::Frame(self.address.clone(), frame.to_vec()));
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), TransportError> {
        self.log.lock().push(Wire::Close(self.address.clone()));
        Ok(())
    }
}

/// Solid-color capture that fails every sample while `failing` is set
///
/// Every session has an id; freeing it removes the id from `live`. A sample
/// taken through an id that is no longer live counts in `samples_after_free`.
pub struct SwitchableCapture {
    color: Color,
    pub failing: AtomicBool,
    /// Each `setup` call blocks this long
    pub setup_delay_ms: AtomicU64,
    pub setups: AtomicUsize,
    pub frees: AtomicUsize,
    pub samples: AtomicUsize,
    pub samples_after_free: AtomicUsize,
    live: Mutex<HashSet<usize>>,
}

impl SwitchableCapture {
    pub fn new(color: Color) -> Arc<Self> {
        Arc::new(Self {
            color,
            failing: AtomicBool::new(false),
            setup_delay_ms: AtomicU64::new(0),
            setups: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
            samples: AtomicUsize::new(0),
            samples_after_free: AtomicUsize::new(0),
            live: Mutex::new(HashSet::new()),
        })
    }

    pub fn live_sessions(&self) -> usize {
        self.live.lock().len()
    }
}

/// Newtype so the test keeps a handle on the counters
pub struct Shared(pub Arc<SwitchableCapture>);

impl CaptureBackend for Shared {
    fn name(&self) -> &str {
        "switchable"
    }

    fn setup(&self, region: &CaptureRegion) -> Result<Box<dyn CaptureSession>, CaptureError> {
        let delay = self.0.setup_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        let id = self.0.setups.fetch_add(1, Ordering::SeqCst);
        self.0.live.lock().insert(id);
        let c = self.0.color;
        Ok(Box::new(SwitchableSession {
            id,
            backend: self.0.clone(),
            data: [c.r(), c.g(), c.b(), 255].repeat((region.width * region.height) as usize),
            width: region.width,
            height: region.height,
        }))
    }
}

struct SwitchableSession {
    id: usize,
    backend: Arc<SwitchableCapture>,
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl CaptureSession for SwitchableSession {
    fn sample(&mut self) -> Result<PixelFrame<'_>, CaptureError> {
        self.backend.samples.fetch_add(1, Ordering::SeqCst);
        if !self.backend.live.lock().contains(&self.id) {
            self.backend.samples_after_free.fetch_add(1, Ordering::SeqCst);
        }
        if self.backend.failing.load(Ordering::SeqCst) {
            return Err(CaptureError::Sample("display lost".into()));
        }
        Ok(PixelFrame::packed(
            &self.data,
            self.width,
            self.height,
            PixelFormat::Rgba,
        ))
    }

    fn free(self: Box<Self>) -> Result<(), CaptureError> {
        self.backend.live.lock().remove(&self.id);
        self.backend.frees.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One-strip configuration on `10.0.0.1:<port>`, 100 updates/s
pub fn single_strip(port: u16, leds: usize, lerp: f32) -> InstanceConfig {
    let json = format!(
        r#"[{{ "type": "pi", "ip": "10.0.0.1", "port": {port}, "leds": {leds},
            "ups": 100, "maxBrightness": 765, "lerp": {lerp},
            "segments": [{{ "offset": 0, "length": {leds}, "x": 0, "y": 0,
                            "width": 16, "height": 4, "fps": 100,
                            "orientation": true }}] }}]"#
    );
    InstanceConfig::load_from_json(&json).expect("test config")
}

/// Several single-LED-run strips in one configuration
pub fn strips(ports: &[u16], leds: usize) -> InstanceConfig {
    InstanceConfig {
        strips: ports
            .iter()
            .flat_map(|&port| single_strip(port, leds, 0.0).strips)
            .collect(),
    }
}

/// No address receives a frame between its `Close` and its next `Connect`
pub fn assert_no_write_after_close(log: &[Wire]) {
    let mut closed: HashSet<&str> = HashSet::new();
    for (i, wire) in log.iter().enumerate() {
        match wire {
            Wire::Close(a) => {
                closed.insert(a);
            }
            Wire::Connect(a) => {
                closed.remove(a.as_str());
            }
            Wire::Frame(a, _) => {
                assert!(!closed.contains(a.as_str()), "write after close at {i}: {log:?}");
            }
            Wire::ConnectFailed(_) => {}
        }
    }
}

pub fn address(port: u16) -> String {
    format!("10.0.0.1:{port}")
}

pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
