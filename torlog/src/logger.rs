//! Timestamped line logger
//!
//! Every line written through a [`LogSink`] has the form
//! `YYYY-MM-DD HH:MM:SS <unix-epoch:.2> <message>\n`. The event log file and
//! the operator stream (stderr) are both sinks; [`TimestampedLogger`] pairs
//! them so callers can address one or both.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local, TimeZone};
use thiserror::Error;
use tracing::{debug, warn};

/// Local wall-clock format used as the first two fields of every line
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Errors from writing log lines
#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to open log file {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to write to {sink}: {source}")]
    Write { sink: String, source: io::Error },

    #[error("{0} is closed")]
    Closed(String),
}

/// Format one log line (including the trailing newline)
pub fn format_line<Tz: TimeZone>(now: &DateTime<Tz>, message: &str) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let epoch = now.timestamp_millis() as f64 / 1000.0;
    format!("{} {:.2} {}\n", now.format(DATETIME_FORMAT), epoch, message)
}

/// A single line-oriented destination
///
/// Writes are serialized by a mutex and each line goes out in a single
/// `write_all`, so concurrent callers never interleave partial lines.
pub struct LogSink {
    name: String,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
}

impl LogSink {
    /// Open (or create) a file in append mode
    pub fn append_file(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref();
        debug!(?path, "LogSink::append_file: opening");
        let file: File = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| LogError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_writer(path.display().to_string(), file))
    }

    /// The operator-visible stream
    pub fn stderr() -> Self {
        Self::from_writer("stderr", io::stderr())
    }

    /// Wrap any writer (used for tests and alternate streams)
    pub fn from_writer(name: impl Into<String>, writer: impl Write + Send + 'static) -> Self {
        Self {
            name: name.into(),
            writer: Mutex::new(Some(Box::new(writer))),
        }
    }

    /// Write one timestamped line stamped with the current time
    pub fn write_line(&self, message: &str) -> Result<(), LogError> {
        self.write_line_at(&Local::now(), message)
    }

    /// Write one line with an explicit timestamp
    pub fn write_line_at<Tz: TimeZone>(&self, now: &DateTime<Tz>, message: &str) -> Result<(), LogError>
    where
        Tz::Offset: std::fmt::Display,
    {
        let line = format_line(now, message);
        // Poisoning leaves the writer usable.
        let mut guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let writer = guard.as_mut().ok_or_else(|| LogError::Closed(self.name.clone()))?;
        writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|source| LogError::Write {
                sink: self.name.clone(),
                source,
            })
    }

    /// Flush and drop the underlying writer
    ///
    /// Returns true only for the call that actually closed the sink.
    pub fn close(&self) -> bool {
        let mut guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        match guard.take() {
            Some(mut writer) => {
                if let Err(e) = writer.flush() {
                    warn!(sink = %self.name, error = %e, "LogSink::close: flush failed");
                }
                debug!(sink = %self.name, "LogSink::close: closed");
                true
            }
            None => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.writer.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink").field("name", &self.name).finish()
    }
}

/// Where a message goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// The persistent event log
    File,
    /// The operator stream
    Operator,
    /// Both, file first
    Both,
}

/// The event log file paired with the operator stream
#[derive(Debug, Clone)]
pub struct TimestampedLogger {
    path: PathBuf,
    file: Arc<LogSink>,
    operator: Arc<LogSink>,
}

impl TimestampedLogger {
    /// Open the event log at `path` and mirror to stderr
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let file = LogSink::append_file(&path)?;
        Ok(Self::with_sinks(path, file, LogSink::stderr()))
    }

    /// Build from explicit sinks
    pub fn with_sinks(path: PathBuf, file: LogSink, operator: LogSink) -> Self {
        Self {
            path,
            file: Arc::new(file),
            operator: Arc::new(operator),
        }
    }

    /// Path of the persistent event log
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> &Arc<LogSink> {
        &self.file
    }

    pub fn operator(&self) -> &Arc<LogSink> {
        &self.operator
    }

    /// Write `message` to the chosen destination(s)
    ///
    /// With [`Destination::Both`] the operator copy is still attempted when
    /// the file write fails; the file error is the one returned.
    pub fn log(&self, destination: Destination, message: &str) -> Result<(), LogError> {
        match destination {
            Destination::File => self.file.write_line(message),
            Destination::Operator => self.operator.write_line(message),
            Destination::Both => {
                let file_result = self.file.write_line(message);
                let operator_result = self.operator.write_line(message);
                file_result.and(operator_result)
            }
        }
    }

    /// Log to the chosen destination, downgrading failures to warnings
    pub fn log_best_effort(&self, destination: Destination, message: &str) {
        if let Err(e) = self.log(destination, message) {
            warn!(error = %e, ?destination, "TimestampedLogger: write failed");
        }
    }

    /// Close the persistent event log
    pub fn close(&self) -> bool {
        self.file.close()
    }
}
