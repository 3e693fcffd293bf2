//! Instance registry
//!
//! Owns every running [`Instance`], keyed by configuration source name, and
//! applies [`RegistryEvent`]s to them one at a time:
//!
//! - `Upsert` closes an existing instance of the same name completely before
//!   the new one is opened, so two instances never drive the same strips.
//! - `Remove` closes and forgets.
//! - `Pause` / `Freeze` apply to every instance, including ones opened later.
//!
//! Capture failures come back from the sampling tasks as [`FailureNotice`]s.
//! The failed instance is closed at once and reopened from its last
//! configuration after the reopen delay. Each open attempt and each scheduled
//! reopen gets a generation number; a notice from an older one is ignored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::capture::{CaptureError, SharedBackend};
use crate::config::InstanceConfig;
use crate::device::ConnectorFactory;
use crate::pipeline::{FailureHook, Instance, Scheduler, StripFlags};

/// Delay before retrying an instance that failed to open
pub const DEFAULT_REOPEN_DELAY: Duration = Duration::from_secs(1);

/// Input to the registry
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// Add or replace the instance `name`
    Upsert { name: String, config: InstanceConfig },
    /// Close and forget the instance `name`
    Remove { name: String },
    Pause(bool),
    Freeze(bool),
}

/// Capture failure reported by a running instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureNotice {
    pub name: String,
    pub generation: u64,
}

struct Entry {
    generation: u64,
    config: Arc<InstanceConfig>,
    instance: Option<Instance>,
}

pub struct InstanceRegistry {
    backend: SharedBackend,
    connectors: Arc<dyn ConnectorFactory>,
    scheduler: Scheduler,
    entries: HashMap<String, Entry>,
    next_generation: u64,
    paused: bool,
    frozen: bool,
    reopen_delay: Duration,
    failures_tx: mpsc::UnboundedSender<FailureNotice>,
    failures_rx: mpsc::UnboundedReceiver<FailureNotice>,
}

impl InstanceRegistry {
    pub fn new(
        backend: SharedBackend,
        connectors: Arc<dyn ConnectorFactory>,
        scheduler: Scheduler,
    ) -> Self {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            connectors,
            scheduler,
            entries: HashMap::new(),
            next_generation: 0,
            paused: false,
            frozen: false,
            reopen_delay: DEFAULT_REOPEN_DELAY,
            failures_tx,
            failures_rx,
        }
    }

    pub fn with_reopen_delay(mut self, delay: Duration) -> Self {
        self.reopen_delay = delay;
        self
    }

    /// Names of all configured instances, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `name` currently has open strips
    pub fn is_running(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .is_some_and(|e| e.instance.is_some())
    }

    /// Generation of the latest open attempt of `name`
    pub fn generation(&self, name: &str) -> Option<u64> {
        self.entries.get(name).map(|e| e.generation)
    }

    pub fn instance(&self, name: &str) -> Option<&Instance> {
        self.entries.get(name).and_then(|e| e.instance.as_ref())
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Apply one event
    pub async fn apply(&mut self, event: RegistryEvent) {
        match event {
            RegistryEvent::Upsert { name, config } => self.upsert(name, config).await,
            RegistryEvent::Remove { name } => self.remove(&name).await,
            RegistryEvent::Pause(paused) => self.set_paused(paused),
            RegistryEvent::Freeze(frozen) => self.set_frozen(frozen),
        }
    }

    /// Add or replace an instance
    pub async fn upsert(&mut self, name: String, config: InstanceConfig) {
        if let Some(instance) = self.entries.get_mut(&name).and_then(|e| e.instance.take()) {
            info!(instance = %name, "Replacing instance");
            instance.close().await;
        }

        self.entries.insert(
            name.clone(),
            Entry {
                generation: 0,
                config: Arc::new(config),
                instance: None,
            },
        );
        self.open(&name).await;
    }

    /// Close and forget an instance
    pub async fn remove(&mut self, name: &str) {
        match self.entries.remove(name) {
            Some(entry) => {
                if let Some(instance) = entry.instance {
                    instance.close().await;
                }
                info!(instance = %name, "Instance removed");
            }
            None => debug!(instance = %name, "Remove for unknown instance"),
        }
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        for instance in self.entries.values().filter_map(|e| e.instance.as_ref()) {
            instance.set_paused(paused);
        }
        info!(paused, "Pause state changed");
    }

    pub fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
        for instance in self.entries.values().filter_map(|e| e.instance.as_ref()) {
            instance.set_frozen(frozen);
        }
        info!(frozen, "Freeze state changed");
    }

    /// Reopen an instance after a capture failure
    pub async fn handle_failure(&mut self, notice: FailureNotice) {
        let Some(entry) = self.entries.get_mut(&notice.name) else {
            debug!(instance = %notice.name, "Failure for removed instance ignored");
            return;
        };
        if entry.generation != notice.generation {
            debug!(
                instance = %notice.name,
                stale = notice.generation,
                current = entry.generation,
                "Stale failure ignored"
            );
            return;
        }

        match entry.instance.take() {
            Some(instance) => {
                warn!(
                    instance = %notice.name,
                    retry_in = ?self.reopen_delay,
                    "Capture failed, reopening instance"
                );
                instance.close().await;
                self.schedule_reopen(&notice.name);
            }
            None => self.open(&notice.name).await,
        }
    }

    /// Send a reopen notice for `name` after `reopen_delay`
    ///
    /// The notice carries a fresh generation, so further notices from the
    /// closed attempt are stale.
    fn schedule_reopen(&mut self, name: &str) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let Some(entry) = self.entries.get_mut(name) else {
            return;
        };
        entry.generation = generation;

        let failures = self.failures_tx.clone();
        let notice = FailureNotice {
            name: name.to_string(),
            generation,
        };
        let delay = self.reopen_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = failures.send(notice);
        });
    }

    /// Open the configured instance `name`, or schedule a retry
    async fn open(&mut self, name: &str) {
        // Every open attempt gets its own generation, so notices from an
        // earlier attempt of the same configuration are stale too
        self.next_generation += 1;
        let generation = self.next_generation;
        let Some(entry) = self.entries.get_mut(name) else {
            return;
        };
        entry.generation = generation;
        let config = entry.config.clone();

        let failures = self.failures_tx.clone();
        let hook_name = name.to_string();
        let on_failure: FailureHook = Arc::new(move |_strip: &str, _error: &CaptureError| {
            let _ = failures.send(FailureNotice {
                name: hook_name.clone(),
                generation,
            });
        });

        let opened = Instance::open(
            name,
            &config,
            &self.backend,
            self.connectors.as_ref(),
            &self.scheduler,
            StripFlags {
                paused: self.paused,
                frozen: self.frozen,
            },
            on_failure,
        )
        .await;

        match opened {
            Ok(instance) => {
                if let Some(entry) = self.entries.get_mut(name) {
                    entry.instance = Some(instance);
                } else {
                    instance.close().await;
                }
            }
            Err(e) => {
                warn!(
                    instance = %name,
                    retry_in = ?self.reopen_delay,
                    "Cannot open instance: {e}"
                );
                self.schedule_reopen(name);
            }
        }
    }

    /// Close every instance
    pub async fn shutdown(&mut self) {
        let instances: Vec<Instance> = self
            .entries
            .drain()
            .filter_map(|(_, e)| e.instance)
            .collect();
        futures::future::join_all(instances.into_iter().map(Instance::close)).await;
        info!("All instances closed");
    }

    /// Apply events and failure notices until `shutdown` flips to true or the
    /// event channel closes, then close everything
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<RegistryEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let step = tokio::select! {
                biased;
                changed = shutdown.changed() => match changed {
                    Ok(()) => Step::Idle,
                    Err(_) => Step::Stop,
                },
                event = events.recv() => event.map_or(Step::Stop, Step::Event),
                Some(notice) = self.failures_rx.recv() => Step::Failure(notice),
            };
            match step {
                Step::Idle => {}
                Step::Stop => break,
                Step::Event(event) => self.apply(event).await,
                Step::Failure(notice) => self.handle_failure(notice).await,
            }
        }
        self.shutdown().await;
    }
}

enum Step {
    Idle,
    Stop,
    Event(RegistryEvent),
    Failure(FailureNotice),
}
