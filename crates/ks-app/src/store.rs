//! Settings that survive a reboot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ks_controls::OutputMode;
use ks_core::OutputId;
use tracing::warn;

use crate::error::{AppError, AppResult};

pub const SETPOINT_KEY: &str = "setpoint";

pub fn mode_key(output: OutputId) -> String {
    format!("output.{}.mode", output.number())
}

/// String key/value storage for persisted settings.
pub trait PersistentStore {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&mut self, key: &str, value: &str) -> AppResult<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> AppResult<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Flat JSON object on disk, rewritten on every change.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl JsonFileStore {
    /// Open `path`, starting empty if it does not exist yet.
    pub fn open(path: &Path) -> AppResult<Self> {
        let values = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(AppError::FileRead {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            values,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistentStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> AppResult<()> {
        if self.values.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        // Memory only moves once the file holds the new value.
        let mut next = self.values.clone();
        next.insert(key.to_string(), value.to_string());
        let content = serde_json::to_string_pretty(&next)?;
        std::fs::write(&self.path, content).map_err(|source| AppError::FileWrite {
            path: self.path.clone(),
            source,
        })?;
        self.values = next;
        Ok(())
    }
}

/// Stored setpoint, if it parses and lies in `(0, absmax_c)`.
pub fn load_setpoint(store: &impl PersistentStore, absmax_c: f64) -> Option<f64> {
    let raw = store.get(SETPOINT_KEY)?;
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 && v < absmax_c => Some(v),
        _ => {
            warn!(value = %raw, "ignoring stored setpoint");
            None
        }
    }
}

/// Stored mode of each of `count` outputs; auto where missing or unreadable.
pub fn load_modes(store: &impl PersistentStore, count: usize) -> Vec<OutputMode> {
    (0..count)
        .map(|i| {
            let Ok(id) = OutputId::from_index(i) else {
                return OutputMode::Auto;
            };
            store
                .get(&mode_key(id))
                .and_then(|raw| match raw.parse::<OutputMode>() {
                    Ok(mode) => Some(mode),
                    Err(_) => {
                        warn!(output = id.number(), value = %raw, "ignoring stored output mode");
                        None
                    }
                })
                .unwrap_or_default()
        })
        .collect()
}
