// Configuration file loader
// Parse and validate instance configurations from JSON

use super::{InstanceConfig, Segment, StripConfig};
use ambient_transport::TransportKind;
use std::path::Path;
use thiserror::Error;

/// Errors from loading a configuration source
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Strip {strip}: {reason}")]
    Validation { strip: usize, reason: String },
}

impl InstanceConfig {
    /// Load an instance configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::load_from_json(&content)
    }

    /// Load an instance configuration from a JSON string
    pub fn load_from_json(json: &str) -> Result<Self, ConfigError> {
        let config: InstanceConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every strip
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (index, strip) in self.strips.iter().enumerate() {
            strip.validate().map_err(|reason| ConfigError::Validation {
                strip: index,
                reason,
            })?;
        }
        Ok(())
    }
}

impl StripConfig {
    fn validate(&self) -> Result<(), String> {
        match self.kind {
            TransportKind::Tcp if self.ip.is_empty() || self.port == 0 => {
                return Err("pi strip needs \"ip\" and \"port\"".into());
            }
            TransportKind::Serial if self.com.is_empty() => {
                return Err("arduino strip needs \"com\"".into());
            }
            _ => {}
        }

        if self.leds == 0 {
            return Err("\"leds\" must be at least 1".into());
        }
        if self.ups == 0 {
            return Err("\"ups\" must be at least 1".into());
        }
        if self.kind.is_serial() && self.baud == 0 {
            return Err("\"baud\" must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.lerp) {
            return Err(format!("\"lerp\" {} outside 0..=1", self.lerp));
        }
        for (name, value) in ["R", "G", "B"].iter().zip(self.reduction()) {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("\"reduction{name}\" {value} outside 0..=1"));
            }
        }

        for (index, segment) in self.segments.iter().enumerate() {
            segment
                .validate(self.leds)
                .map_err(|reason| format!("segment {index}: {reason}"))?;
        }

        // Each LED index must have exactly one writer
        let mut ranges: Vec<(usize, std::ops::Range<usize>)> = self
            .segments
            .iter()
            .map(Segment::range)
            .enumerate()
            .collect();
        ranges.sort_by_key(|(_, r)| r.start);
        for pair in ranges.windows(2) {
            let (a, ra) = &pair[0];
            let (b, rb) = &pair[1];
            if rb.start < ra.end {
                return Err(format!(
                    "segments {a} ({ra:?}) and {b} ({rb:?}) write overlapping LEDs"
                ));
            }
        }

        Ok(())
    }
}

impl Segment {
    fn validate(&self, leds: usize) -> Result<(), String> {
        if self.length == 0 {
            return Err("\"length\" must be at least 1".into());
        }
        if !self.fits(leds) {
            return Err(format!(
                "LEDs {:?} exceed strip length {leds}",
                self.range()
            ));
        }
        if self.width == 0 || self.height == 0 {
            return Err("capture region is empty".into());
        }
        if self.steps == 0 {
            return Err("\"steps\" must be at least 1".into());
        }
        if self.fps == 0 {
            return Err("\"fps\" must be at least 1".into());
        }
        Ok(())
    }
}
