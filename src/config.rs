//! Configuration loading.
//!
//! Values come from `config.json` in the platform config directory
//! (`~/Library/Application Support/termnotify` on macOS,
//! `~/.config/termnotify` on Linux), then from `TN_*` environment
//! variables. The CLI `--socket` flag wins over both.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::validation::MAX_ATTACHMENT_SIZE_BYTES;

/// Socket path used when nothing else is configured.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/tn-shim.sock";

/// Runtime configuration for the CLI and the session process.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Session socket path.
    pub socket_path: PathBuf,
    /// Largest accepted local attachment, in bytes.
    pub max_attachment_bytes: u64,
    /// Scheduling delay applied to every notification, in milliseconds.
    pub delivery_delay_ms: u64,
    /// Timeout for downloading a remote attachment, in seconds.
    pub fetch_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            max_attachment_bytes: MAX_ATTACHMENT_SIZE_BYTES,
            delivery_delay_ms: 100,
            fetch_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Platform configuration directory for termnotify.
    ///
    /// `TN_CONFIG_DIR` overrides the platform default.
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("TN_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("termnotify"))
    }

    /// Load from the config file (defaults when missing or malformed), then
    /// apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join("config.json");
        let mut config = Self::load_from_file(&path).unwrap_or_else(|e| {
            log::debug!("[Config] using defaults: {e:#}");
            Self::default()
        });
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(socket) = std::env::var("TN_SHIM_SOCKET") {
            if !socket.is_empty() {
                self.socket_path = PathBuf::from(socket);
            }
        }

        if let Some(max) = env_number("TN_MAX_ATTACHMENT_BYTES") {
            self.max_attachment_bytes = max;
        }

        if let Some(delay) = env_number("TN_DELIVERY_DELAY_MS") {
            self.delivery_delay_ms = delay;
        }

        if let Some(timeout) = env_number("TN_FETCH_TIMEOUT_SECS") {
            self.fetch_timeout_secs = timeout;
        }
    }

    /// Scheduling delay as a [`Duration`].
    pub fn delivery_delay(&self) -> Duration {
        Duration::from_millis(self.delivery_delay_ms)
    }

    /// Remote fetch timeout as a [`Duration`].
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Parse a numeric environment variable, ignoring unparseable values.
fn env_number(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("[Config] ignoring {name}={raw:?}: not a number");
            None
        }
    }
}
