use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Application directory name under the platform config/data dirs
const APP_DIR: &str = "buttonface";

/// Files whose presence in the working directory makes it the config dir
const LOCAL_MARKERS: [&str; 2] = ["buttonface.json", "buttonface.log"];

/// Configuration for overriding default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// `--config-dir` wins over `BUTTONFACE_CONFIG_DIR`.
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var("BUTTONFACE_CONFIG_DIR").ok().map(PathBuf::from));

        Self { config_dir }
    }
}

/// Which platform directory a file falls back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Config,
    Data,
}

impl Location {
    fn platform_dir(self) -> Option<PathBuf> {
        match self {
            Location::Config => dirs_next::config_dir(),
            Location::Data => dirs_next::data_dir(),
        }
    }
}

/// Settings file location: `--config-dir`, then `BUTTONFACE_CONFIG_DIR`, then the
/// working directory if it already holds a marker file, then
/// `<platform config dir>/buttonface`.
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    resolve_dir(config, Location::Config).join(name)
}

/// Log file location. Same order as [`config_file`], defaulting to the platform data dir.
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    resolve_dir(config, Location::Data).join(name)
}

/// Create the config and data directories if missing.
pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    let config_dir = resolve_dir(config, Location::Config);
    let data_dir = resolve_dir(config, Location::Data);
    for dir in [&config_dir, &data_dir] {
        if !dir.exists() {
            std::fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
    }
    Ok(())
}

fn has_local_config_files(dir: &Path) -> bool {
    LOCAL_MARKERS.iter().any(|f| dir.join(f).exists())
}

fn resolve_dir(config: &PathConfig, location: Location) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    let local = std::env::current_dir().ok().filter(|dir| has_local_config_files(dir));
    local
        .or_else(|| location.platform_dir().map(|dir| dir.join(APP_DIR)))
        .unwrap_or_else(|| PathBuf::from("."))
}
