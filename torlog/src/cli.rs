//! CLI definitions and resolution into a session config

use std::path::{Component, Path, PathBuf};

use clap::Parser;
use eyre::{Context, Result};
use tracing::debug;

use crate::config::Config;
use crate::events::{EventType, requested_events};
use crate::session::{PROGRAM_NAME, SessionConfig};

/// tor-ctl-logger - log asynchronous Tor control events to a file
#[derive(Debug, Parser)]
#[command(
    name = "tor-ctl-logger",
    about = "Connects to an open Tor control port and logs asynchronous events to a file",
    version
)]
pub struct Cli {
    /// The Tor control port number N
    #[arg(short = 'p', long = "port", value_name = "N")]
    pub port: u16,

    /// Path of the event log (default: ./tor-ctl-logger.log)
    #[arg(short = 'l', long = "logpath", value_name = "PATH")]
    pub logpath: Option<PathBuf>,

    /// Well-known events to monitor (default: all except DEBUG)
    #[arg(short = 'e', long = "events", value_name = "EVENT", num_args = 1..)]
    pub events: Option<Vec<EventType>>,

    /// Custom events not known locally, passed to the daemon as-is
    #[arg(short = 'c', long = "custom-events", value_name = "CUSTOM_EVENT", num_args = 1..)]
    pub custom_events: Option<Vec<String>>,

    /// Control port host
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Seconds between heartbeat lines on stderr
    #[arg(long = "heartbeat-secs", value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub heartbeat_secs: Option<u64>,

    /// Path to config file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Diagnostic log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,
}

/// Default event log path: `<cwd>/tor-ctl-logger.log`
pub fn default_log_path() -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    Ok(cwd.join(format!("{}.log", PROGRAM_NAME)))
}

/// Expand a leading `~`, make the path absolute and fold `.`/`..` lexically
pub fn normalize_path(path: &Path, home: Option<&Path>) -> Result<PathBuf> {
    let expanded = match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    };
    let absolute = std::path::absolute(&expanded)
        .with_context(|| format!("Failed to make {} absolute", expanded.display()))?;

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            // `..` at the root stays at the root.
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    debug!(?path, ?normalized, "normalize_path: resolved");
    Ok(normalized)
}

impl Cli {
    /// Merge CLI flags over the config file into a session config
    pub fn session_config(&self, config: &Config) -> Result<SessionConfig> {
        let log_path = match &self.logpath {
            Some(p) => normalize_path(p, dirs::home_dir().as_deref())?,
            None => default_log_path()?,
        };

        let well_known = self.events.clone().unwrap_or_else(|| config.well_known_events());
        let custom = self.custom_events.clone().unwrap_or_else(|| config.custom_events.clone());

        let mut session = SessionConfig::new(self.port, log_path, requested_events(&well_known, &custom));
        session.host = self.host.clone().unwrap_or_else(|| config.control.host.clone());
        session.credentials = config.control.credentials();
        session.timeout = config.control.timeout();
        session.heartbeat_interval = match self.heartbeat_secs {
            Some(secs) => std::time::Duration::from_secs(secs),
            None => config.heartbeat.interval(),
        };

        debug!(?session, "Cli::session_config: resolved");
        Ok(session)
    }
}
