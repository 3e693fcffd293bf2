//! Strip and segment configuration
//!
//! One configuration file describes one instance: an array of strips, each
//! bound to a controller and fed by one or more screen segments.
//!
//! - `json`: parsing and validation of configuration files
//! - `watcher`: directory scanning that turns file changes into registry events

mod json;
mod watcher;

pub use json::ConfigError;
pub use watcher::ConfigDirectory;

use ambient_transport::TransportKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default smoothing factor
pub const DEFAULT_LERP: f32 = 0.5;

/// One screen region feeding a contiguous LED range of a strip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// First LED index written by this segment
    pub offset: usize,
    /// Number of LEDs written by this segment
    pub length: usize,
    /// Display the region lives on
    #[serde(default)]
    pub display: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Sampling stride in pixels along both axes
    #[serde(default = "default_steps")]
    pub steps: u32,
    /// Capture cadence (samples per second)
    pub fps: u32,
    /// true: LEDs run left to right across the region, false: top to bottom
    #[serde(default)]
    pub orientation: bool,
    /// Write LEDs in reverse order
    #[serde(default)]
    pub invert: bool,
}

fn default_steps() -> u32 {
    1
}

impl Segment {
    /// LED index range owned by this segment
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset.saturating_add(self.length)
    }

    /// Whether every LED of the segment lies below `leds`
    pub fn fits(&self, leds: usize) -> bool {
        self.offset
            .checked_add(self.length)
            .is_some_and(|end| end <= leds)
    }

    pub fn period(&self) -> Duration {
        period_for(self.fps)
    }
}

/// One physical LED strip and the controller driving it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StripConfig {
    #[serde(rename = "type")]
    pub kind: TransportKind,
    /// Controller IP (pi)
    #[serde(default)]
    pub ip: String,
    /// Controller TCP port (pi)
    #[serde(default)]
    pub port: u16,
    /// Serial port name or description substring (arduino)
    #[serde(default)]
    pub com: String,
    /// Number of LEDs on the strip
    pub leds: usize,
    /// Update cadence (frames per second sent to the controller)
    pub ups: u32,
    /// Maximum average R+G+B per LED (0..=765)
    pub max_brightness: u32,
    #[serde(default = "default_reduction")]
    pub reduction_r: f32,
    #[serde(default = "default_reduction")]
    pub reduction_g: f32,
    #[serde(default = "default_reduction")]
    pub reduction_b: f32,
    pub segments: Vec<Segment>,
    /// Smoothing factor, 0 = no smoothing, 1 = frozen
    #[serde(default = "default_lerp")]
    pub lerp: f32,
    /// Serial baud rate (arduino)
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Perform the reset handshake after opening the serial port (arduino)
    #[serde(default = "default_handshake")]
    pub handshake: bool,
    /// Send the controller header once after connecting
    #[serde(default)]
    pub header: bool,
}

fn default_reduction() -> f32 {
    1.0
}

fn default_lerp() -> f32 {
    DEFAULT_LERP
}

fn default_baud() -> u32 {
    ambient_transport::DEFAULT_BAUD_RATE
}

fn default_handshake() -> bool {
    true
}

impl StripConfig {
    /// Controller address as used by the transport
    pub fn address(&self) -> String {
        match self.kind {
            TransportKind::Tcp => format!("{}:{}", self.ip, self.port),
            TransportKind::Serial => self.com.clone(),
        }
    }

    pub fn reduction(&self) -> [f32; 3] {
        [self.reduction_r, self.reduction_g, self.reduction_b]
    }

    pub fn period(&self) -> Duration {
        period_for(self.ups)
    }

    /// Controller header for this strip
    pub fn controller_header(&self) -> ambient_transport::ControllerHeader {
        ambient_transport::ControllerHeader {
            max_brightness: self.max_brightness,
            led_count: self.leds as u32,
            reduction: self.reduction(),
            lerp: self.lerp,
            ups: self.ups,
        }
    }
}

/// Everything loaded from one configuration source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceConfig {
    pub strips: Vec<StripConfig>,
}

impl InstanceConfig {
    /// Number of periodic tasks this instance will schedule
    pub fn task_count(&self) -> usize {
        self.strips.iter().map(|s| 1 + s.segments.len()).sum()
    }
}

fn period_for(rate: u32) -> Duration {
    Duration::from_micros(1_000_000 / u64::from(rate.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period() {
        assert_eq!(period_for(50), Duration::from_millis(20));
        assert_eq!(period_for(0), Duration::from_secs(1));
    }

    #[test]
    fn test_segment_range() {
        let seg = Segment {
            offset: 10,
            length: 5,
            display: 0,
            x: 0,
            y: 0,
            width: 100,
            height: 10,
            steps: 1,
            fps: 30,
            orientation: true,
            invert: false,
        };
        assert_eq!(seg.range(), 10..15);
    }
}
