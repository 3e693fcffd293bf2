// Configuration directory scanner
// Turns *.json files in a directory into registry events

use super::{ConfigError, InstanceConfig};
use crate::registry::RegistryEvent;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// A directory of instance configurations, one `*.json` file per instance
///
/// Each call to [`scan`](Self::scan) compares the directory against the
/// previous scan and reports the difference: new or modified files become
/// `Upsert`, vanished files become `Remove`. The instance name is the file
/// name.
pub struct ConfigDirectory {
    dir: PathBuf,
    /// Last seen modification time per file name
    seen: HashMap<String, SystemTime>,
}

impl ConfigDirectory {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            seen: HashMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Scan the directory and return events for everything that changed
    ///
    /// A file that fails to parse is logged and produces no event, so an
    /// instance already running from an earlier version of it keeps running.
    pub fn scan(&mut self) -> Result<Vec<RegistryEvent>, ConfigError> {
        let mut events = Vec::new();
        let mut present = HashMap::new();

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = config_name(&path) else {
                continue;
            };

            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) => {
                    warn!(file = %name, "Cannot stat configuration: {e}");
                    continue;
                }
            };
            present.insert(name.clone(), modified);

            if self.seen.get(&name) == Some(&modified) {
                continue;
            }

            match InstanceConfig::load_from_file(&path) {
                Ok(config) => {
                    debug!(file = %name, strips = config.strips.len(), "Configuration loaded");
                    events.push(RegistryEvent::Upsert { name, config });
                }
                Err(e) => {
                    warn!(file = %name, "Skipping configuration: {e}");
                }
            }
        }

        for name in self.seen.keys() {
            if !present.contains_key(name) {
                events.push(RegistryEvent::Remove { name: name.clone() });
            }
        }

        self.seen = present;
        Ok(events)
    }
}

/// File name if `path` is a `.json` file
fn config_name(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    let is_json = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if !is_json {
        return None;
    }
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}
