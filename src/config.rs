//! Configuration loading and persistence.
//!
//! Settings come from `relay.json` in the platform config directory (or an
//! explicit path), then environment variables, then command-line flags
//! applied by the binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{fs, time::Duration};

use crate::relay::{BackoffPolicy, ChannelBinding, RelaySettings, DEFAULT_LAG_TOLERANCE};

const CONFIG_FILE: &str = "relay.json";

/// Configuration for the relay client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Root URL of the experiment server.
    pub server_url: String,
    /// Websocket endpoint path.
    pub endpoint: String,
    /// Channel the server broadcasts on.
    pub broadcast: String,
    /// Channel this client writes to.
    pub control: String,
    /// Lag tolerance advertised in the subscription query.
    pub lag_tolerance: f64,
    /// Seconds allowed for each websocket handshake.
    pub connect_timeout_secs: u64,
    /// First reconnect delay in milliseconds.
    pub initial_backoff_ms: u64,
    /// Reconnect delay ceiling in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:5000".to_string(),
            endpoint: "chat".to_string(),
            broadcast: "recall".to_string(),
            control: "recall_ctrl".to_string(),
            lag_tolerance: DEFAULT_LAG_TOLERANCE,
            connect_timeout_secs: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}

impl RelayConfig {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `RECALL_RELAY_CONFIG_DIR` overrides the platform config directory.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("RECALL_RELAY_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("recall-relay")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config dir {}", dir.display()))?;
        Ok(dir)
    }

    /// Default config file path.
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// An explicit `path` must exist; the default file is optional and
    /// falls back to defaults when missing.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::default_path() {
                Ok(path) if path.exists() => Self::load_from_file(&path)?,
                Ok(_) => Self::default(),
                Err(e) => {
                    log::warn!("[Config] {:#}; using defaults", e);
                    Self::default()
                }
            },
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Reads and parses one config file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(server_url) = lookup("RECALL_RELAY_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Some(broadcast) = lookup("RECALL_RELAY_BROADCAST") {
            self.broadcast = broadcast;
        }

        if let Some(control) = lookup("RECALL_RELAY_CONTROL") {
            self.control = control;
        }

        if let Some(tolerance) = lookup("RECALL_RELAY_TOLERANCE") {
            match tolerance.parse::<f64>() {
                Ok(t) if t.is_finite() && t >= 0.0 => self.lag_tolerance = t,
                _ => log::warn!("[Config] Ignoring invalid RECALL_RELAY_TOLERANCE={}", tolerance),
            }
        }
    }

    /// Persists the configuration to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    /// Channel binding described by this config.
    pub fn binding(&self) -> ChannelBinding {
        ChannelBinding::new(&self.broadcast, &self.control).with_lag_tolerance(self.lag_tolerance)
    }

    /// Reconnect timing described by this config.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(self.initial_backoff_ms),
            max: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
            handshake_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    /// Relay settings for connecting.
    pub fn to_settings(&self) -> RelaySettings {
        RelaySettings {
            server_url: self.server_url.clone(),
            endpoint: self.endpoint.clone(),
            binding: self.binding(),
            backoff: self.backoff(),
        }
    }
}
