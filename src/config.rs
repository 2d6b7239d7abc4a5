//! Runtime settings, persisted as `buttonface.json` in the config directory.

use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::entities::keys::DEFAULT_LEARN_TIMEOUT_MS;
use crate::paths::{config_file, PathConfig};

/// Settings file name inside the config directory
pub const SETTINGS_FILE: &str = "buttonface.json";

/// Engine settings. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Connection notifications
    pub notification_queue_size: usize, // Bounded queue capacity; overflow is dropped
    pub dispatcher_thread: bool,        // Deliver on a background thread instead of draining inline

    // Learn
    pub default_learn_timeout_ms: u64, // Used when a definition has no timeout of its own

    // Rendering
    pub only_enabled: bool, // Leave disabled elements out of the output
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            notification_queue_size: 1024,
            dispatcher_thread: true,
            default_learn_timeout_ms: DEFAULT_LEARN_TIMEOUT_MS,
            only_enabled: true,
        }
    }
}

impl Settings {
    /// Load from a file. A missing file yields the defaults; a malformed one is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        let settings = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse settings: {}", path.display()))?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Load `buttonface.json` from the resolved config directory.
    pub fn load(paths: &PathConfig) -> Result<Self> {
        Self::load_from(&config_file(SETTINGS_FILE, paths))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write settings: {}", path.display()))
    }

    pub fn learn_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.default_learn_timeout_ms)
    }
}
