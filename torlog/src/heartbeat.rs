//! Liveness Reporter
//!
//! Periodically reports how large the event log has grown. Heartbeats go to
//! the operator stream only, so they never inflate the file they measure.

use std::fs::File;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::logger::LogSink;

/// Default interval between heartbeats
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Why the heartbeat loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatExit {
    /// Operator interrupt
    Cancelled,
    /// The control channel went away
    ChannelLost,
}

/// Heartbeat message for a log of `bytes` at `path`
pub fn heartbeat_message(bytes: u64, path: &Path) -> String {
    format!(
        "heartbeat: logged {} bytes to {}, press CTRL-C to quit",
        bytes,
        path.display()
    )
}

/// Reports the event log size on a fixed interval
#[derive(Debug, Clone)]
pub struct LivenessReporter {
    log_path: PathBuf,
    interval: Duration,
    operator: Arc<LogSink>,
}

impl LivenessReporter {
    pub fn new(log_path: impl Into<PathBuf>, interval: Duration, operator: Arc<LogSink>) -> Self {
        Self {
            log_path: log_path.into(),
            interval,
            operator,
        }
    }

    /// Current size of the event log, read through a fresh read-only handle
    pub fn log_size(&self) -> io::Result<u64> {
        let file = File::open(&self.log_path)?;
        Ok(file.metadata()?.len())
    }

    /// Emit one heartbeat; returns the size reported
    pub fn tick(&self) -> io::Result<u64> {
        let bytes = self.log_size()?;
        debug!(bytes, path = ?self.log_path, "LivenessReporter::tick");
        if let Err(e) = self.operator.write_line(&heartbeat_message(bytes, &self.log_path)) {
            warn!(error = %e, "LivenessReporter: failed to write heartbeat");
        }
        Ok(bytes)
    }

    /// Heartbeat until cancelled or until `channel_lost` resolves
    ///
    /// The first heartbeat is immediate. A failed size check is reported and
    /// the loop keeps going.
    pub async fn run<F>(&self, cancel: &CancellationToken, channel_lost: F) -> HeartbeatExit
    where
        F: Future<Output = ()>,
    {
        debug!(interval = ?self.interval, "LivenessReporter::run: starting");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(channel_lost);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("LivenessReporter::run: cancelled");
                    return HeartbeatExit::Cancelled;
                }

                _ = &mut channel_lost => {
                    debug!("LivenessReporter::run: channel lost");
                    return HeartbeatExit::ChannelLost;
                }

                _ = interval.tick() => {
                    if let Err(e) = self.tick() {
                        warn!(error = %e, path = ?self.log_path, "LivenessReporter: size check failed");
                        let _ = self.operator.write_line(&format!(
                            "[WARNING] heartbeat could not read {}: {}",
                            self.log_path.display(),
                            e
                        ));
                    }
                }
            }
        }
    }
}
