// Ambient LED driver - Shared Library
// Screen sampling, color processing, controller channels and instance lifecycle

pub mod capture;
pub mod color;
pub mod config;
pub mod device;
pub mod pipeline;
pub mod registry;
pub mod sampler;

pub use ambient_transport as transport;

pub use capture::{CaptureBackend, CaptureError, CaptureRegion, CaptureSession, StaticCapture};
pub use color::{Color, SharedColors};
pub use config::{ConfigDirectory, ConfigError, InstanceConfig, Segment, StripConfig};
pub use device::{ChannelState, ChannelStats, ConnectorFactory, DeviceChannel, SystemConnectors};
pub use pipeline::{Instance, PipelineError, Scheduler, StripPipeline};
pub use registry::{FailureNotice, InstanceRegistry, RegistryEvent};
