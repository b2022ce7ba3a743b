//! Config file handling

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::UpdateError;
use crate::install::DEFAULT_INSTALLER_ARGS;

pub const DEFAULT_CHECK_URL: &str = "https://raw.githubusercontent.com/GofMan5/OPP/main/update_info.json";
pub const DEFAULT_PRODUCT_NAME: &str = "OPP";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 100;

/// Updater configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub config_dir: PathBuf,
    /// Descriptor endpoint
    pub check_url: String,
    /// Prefix of the installer filename
    pub product_name: String,
    /// Preferred download directory; the temp dir is used when not writable
    pub updates_dir: PathBuf,
    /// Connect timeout, whole-request deadline for the descriptor and
    /// changelog, and stall timeout while downloading
    pub timeout: Duration,
    pub progress_interval: Duration,
    /// Treat a size disagreement with the descriptor as a hard failure
    pub strict_size: bool,
    pub installer_args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_dir: Self::default_config_dir(),
            check_url: DEFAULT_CHECK_URL.to_string(),
            product_name: DEFAULT_PRODUCT_NAME.to_string(),
            updates_dir: Self::default_updates_dir(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            progress_interval: Duration::from_millis(DEFAULT_PROGRESS_INTERVAL_MS),
            strict_size: false,
            installer_args: DEFAULT_INSTALLER_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Config {
    /// Load configuration from the config file (TOML format)
    pub fn load() -> Result<Self, UpdateError> {
        let config_file = Self::default_config_dir().join("updater.toml");
        Self::load_from(&config_file)
    }

    /// Load from an explicit file; a missing file yields the defaults
    pub fn load_from(config_file: &Path) -> Result<Self, UpdateError> {
        let config_dir = config_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_dir);

        if !config_file.exists() {
            return Ok(Self { config_dir, ..Self::default() });
        }

        let content = std::fs::read_to_string(config_file)
            .map_err(|e| UpdateError::Config(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content, config_dir)
    }

    /// Parse the `[update]` table of a config document
    pub fn from_toml(content: &str, config_dir: PathBuf) -> Result<Self, UpdateError> {
        let toml_value: toml::Value = toml::from_str(content)
            .map_err(|e| UpdateError::Config(format!("Invalid config TOML: {}", e)))?;

        let mut config = Self { config_dir, ..Self::default() };

        let section = match toml_value.get("update") {
            Some(s) => s,
            None => return Ok(config),
        };

        if let Some(url) = section.get("check_url").and_then(|v| v.as_str()) {
            url::Url::parse(url)
                .map_err(|e| UpdateError::Config(format!("Invalid check_url {:?}: {}", url, e)))?;
            config.check_url = url.to_string();
        }

        if let Some(name) = section.get("product_name").and_then(|v| v.as_str()) {
            if name.trim().is_empty() {
                return Err(UpdateError::Config("product_name must not be empty".to_string()));
            }
            config.product_name = name.trim().to_string();
        }

        if let Some(dir) = section.get("updates_dir").and_then(|v| v.as_str()) {
            let dir = PathBuf::from(dir);
            // Resolve relative paths against config dir
            config.updates_dir = if dir.is_absolute() { dir } else { config.config_dir.join(dir) };
        }

        if let Some(secs) = section.get("timeout_secs").and_then(|v| v.as_integer()) {
            if secs < 1 {
                return Err(UpdateError::Config(format!("timeout_secs must be at least 1, got {}", secs)));
            }
            config.timeout = Duration::from_secs(secs as u64);
        }

        if let Some(ms) = section.get("progress_interval_ms").and_then(|v| v.as_integer()) {
            if ms < 0 {
                return Err(UpdateError::Config(format!("progress_interval_ms must not be negative, got {}", ms)));
            }
            config.progress_interval = Duration::from_millis(ms as u64);
        }

        if let Some(strict) = section.get("strict_size").and_then(|v| v.as_bool()) {
            config.strict_size = strict;
        }

        if let Some(args) = section.get("installer_args").and_then(|v| v.as_array()) {
            config.installer_args = args
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect();
        }

        Ok(config)
    }

    /// Get the default config directory
    fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("opp"))
            .unwrap_or_else(|| PathBuf::from(".opp"))
    }

    /// `%LOCALAPPDATA%\GofMan3\Updates` on Windows
    fn default_updates_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|p| p.join("GofMan3").join("Updates"))
            .unwrap_or_else(|| std::env::temp_dir().join("GofMan3").join("Updates"))
    }
}
