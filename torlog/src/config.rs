//! Configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::control::Credentials;
use crate::events::EventType;

/// Project-local config file name
pub const LOCAL_CONFIG_FILE: &str = ".tor-ctl-logger.yml";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Control port connection settings
    pub control: ControlConfig,

    /// Liveness heartbeat settings
    pub heartbeat: HeartbeatConfig,

    /// Well-known events to subscribe to (default: all but DEBUG)
    pub events: Option<Vec<EventType>>,

    /// Custom events forwarded to the daemon unvalidated
    #[serde(rename = "custom-events")]
    pub custom_events: Vec<String>,

    /// Diagnostic log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .tor-ctl-logger.yml
        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/tor-ctl-logger/tor-ctl-logger.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("tor-ctl-logger").join("tor-ctl-logger.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed; the full load reports them later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Well-known events from config, or the default set
    pub fn well_known_events(&self) -> Vec<EventType> {
        self.events.clone().unwrap_or_else(EventType::defaults)
    }
}

/// Control port connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Address the control port listens on
    pub host: String,

    /// Environment variable holding the control password
    #[serde(rename = "password-env")]
    pub password_env: String,

    /// Cookie file to use instead of the one the daemon advertises
    #[serde(rename = "cookie-path")]
    pub cookie_path: Option<PathBuf>,

    /// Connect and per-command timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            password_env: "TOR_CONTROL_PASSWORD".to_string(),
            cookie_path: None,
            timeout_ms: 10_000,
        }
    }
}

impl ControlConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Credentials from the environment and configured cookie path
    pub fn credentials(&self) -> Credentials {
        Credentials {
            password: std::env::var(&self.password_env).ok().filter(|p| !p.is_empty()),
            cookie_path: self.cookie_path.clone(),
        }
    }
}

/// Liveness heartbeat settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Seconds between heartbeat lines
    #[serde(rename = "interval-secs")]
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}
