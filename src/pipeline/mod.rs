//! Capture-to-device pipelines
//!
//! - `color`: smoothing and brightness budget for one strip
//! - `scheduler`: periodic blocking jobs on the tokio blocking pool
//! - `strip`: the tasks and buffers of one physical strip
//!
//! An [`Instance`] is everything opened from one configuration source.

pub mod color;
pub mod scheduler;
pub mod strip;

pub use color::{apply_brightness_budget, ColorPipeline};
pub use scheduler::{Scheduler, Tick, TickOutcome};
pub use strip::{StripControl, StripFlags, StripPipeline};

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::capture::{CaptureError, SharedBackend};
use crate::config::InstanceConfig;
use crate::device::ConnectorFactory;

/// Errors opening a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{strip}: capture setup for segment {segment} failed: {source}")]
    Capture {
        strip: String,
        segment: usize,
        #[source]
        source: CaptureError,
    },
}

/// Called from a sampling task when capture fails, with the strip label
pub type FailureHook = Arc<dyn Fn(&str, &CaptureError) + Send + Sync>;

/// All strips opened from one configuration
pub struct Instance {
    name: String,
    strips: Vec<StripPipeline>,
}

impl Instance {
    /// Open every strip of `config`
    ///
    /// Every strip starts with `flags`. If any strip fails to open, the
    /// strips already opened are closed again before the error is returned.
    pub async fn open(
        name: &str,
        config: &InstanceConfig,
        backend: &SharedBackend,
        connectors: &dyn ConnectorFactory,
        scheduler: &Scheduler,
        flags: StripFlags,
        on_failure: FailureHook,
    ) -> Result<Self, PipelineError> {
        let mut strips = Vec::with_capacity(config.strips.len());
        for (index, strip) in config.strips.iter().enumerate() {
            let opened = StripPipeline::open(
                format!("{name}#{index}"),
                strip,
                backend,
                connectors.connector(strip),
                scheduler,
                flags,
                on_failure.clone(),
            );
            match opened {
                Ok(pipeline) => strips.push(pipeline),
                Err(e) => {
                    for pipeline in strips {
                        pipeline.close().await;
                    }
                    return Err(e);
                }
            }
        }

        info!(instance = %name, strips = strips.len(), "Instance opened");
        Ok(Self {
            name: name.to_string(),
            strips,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strips(&self) -> &[StripPipeline] {
        &self.strips
    }

    pub fn set_paused(&self, paused: bool) {
        for strip in &self.strips {
            strip.control().set_paused(paused);
        }
    }

    pub fn set_frozen(&self, frozen: bool) {
        for strip in &self.strips {
            strip.control().set_frozen(frozen);
        }
    }

    /// Close every strip; one strip's teardown never blocks another's
    pub async fn close(self) {
        futures::future::join_all(self.strips.into_iter().map(StripPipeline::close)).await;
        info!(instance = %self.name, "Instance closed");
    }
}
