use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

use crate::sensing::{ForwardingOptions, SamplerConfig, SimulationSettings};

pub const DEFAULT_TASK_NAME: &str = "background-location-task";
pub const CONFIG_PATH_ENV: &str = "LIVETRACK_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "livetrack.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackingSettings {
    /// Name the background task is registered under. Changing it orphans any
    /// registration made under the old name.
    pub task_name: String,
    pub sampler: SamplerConfig,
    pub database_path: PathBuf,
    /// Unset keeps a session armed until sign-out regardless of later
    /// permission changes.
    pub permission_recheck_secs: Option<u64>,
    pub silence_warning_secs: Option<u64>,
    pub simulation: SimulationSettings,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            task_name: DEFAULT_TASK_NAME.into(),
            sampler: SamplerConfig::default(),
            database_path: PathBuf::from("livetrack.sqlite3"),
            permission_recheck_secs: None,
            silence_warning_secs: Some(60),
            simulation: SimulationSettings::default(),
        }
    }
}

impl TrackingSettings {
    pub fn forwarding_options(&self) -> ForwardingOptions {
        ForwardingOptions {
            permission_recheck: self
                .permission_recheck_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            silence_warning: self
                .silence_warning_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<TrackingSettings>,
}

impl SettingsStore {
    /// Missing or unreadable JSON falls back to defaults.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "ignoring malformed settings at {}: {err}",
                    path.display()
                );
                TrackingSettings::default()
            })
        } else {
            TrackingSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Path from `LIVETRACK_CONFIG`, or `livetrack.json` in the working directory.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tracking(&self) -> TrackingSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, settings: TrackingSettings) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    fn persist(&self, data: &TrackingSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
