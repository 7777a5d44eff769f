//! tor-ctl-logger - log asynchronous Tor control events
//!
//! CLI entry point: parse flags, load config, run one session until CTRL-C.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use eyre::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use torlog::cli::Cli;
use torlog::config::Config;
use torlog::session::{self, PROGRAM_NAME};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(PROGRAM_NAME)
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(format!("{}.log", PROGRAM_NAME)))
        .context("Failed to open diagnostic log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

/// Cancel `cancel` on every SIGINT/SIGTERM; repeats are harmless
fn spawn_signal_handler(cancel: CancellationToken) -> Result<tokio::task::JoinHandle<()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sigint.recv() => debug!("signal handler: SIGINT received"),
                    _ = sigterm.recv() => debug!("signal handler: SIGTERM received"),
                }
                info!("Interrupt received, shutting down");
                cancel.cancel();
            }
        }))
    }

    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
                cancel.cancel();
            }
        }))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let session_config = cli.session_config(&config)?;
    info!(port = session_config.port, log_path = ?session_config.log_path, "Starting session");

    let cancel = CancellationToken::new();
    let signals = spawn_signal_handler(cancel.clone())?;

    let result = session::run(session_config, &cancel).await;
    signals.abort();

    match &result {
        Ok(()) => info!("Exiting cleanly"),
        Err(e) => info!(error = %e, "Exiting with error"),
    }
    result.map_err(Into::into)
}
