//! Subscription Manager
//!
//! Registers requested events with the daemon one at a time. Rejection of a
//! well-known event is recoverable (older daemons lack newer events); rejection
//! of a custom event aborts the run, since a custom name with no fallback
//! meaning is most likely a typo.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::control::{ControlChannel, ControlError};
use crate::events::{EventName, EventNameError};
use crate::logger::{Destination, LogError, TimestampedLogger};

/// Fatal subscription failures
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("event '{name}' is not recognized by the remote daemon: {source}")]
    CustomRejected { name: String, source: ControlError },

    #[error("event '{name}' cannot be subscribed: {source}")]
    Unencodable { name: String, source: EventNameError },

    #[error("control channel failed while subscribing to '{name}': {source}")]
    Channel { name: String, source: ControlError },

    #[error("failed to record subscription result: {0}")]
    Log(#[from] LogError),
}

/// Outcome of one registration attempt
#[derive(Debug)]
pub enum Registration {
    /// The daemon accepted the event
    Registered,
    /// Well-known event the daemon does not support; keep going
    Rejected(ControlError),
    /// Abort the whole run
    Fatal(SubscriptionError),
}

/// Warning written when the daemon lacks a well-known event
pub fn unsupported_warning(name: &EventName) -> String {
    format!(
        "[WARNING] event '{}' is recognized locally but not by the remote daemon",
        name
    )
}

/// Error written when the daemon rejects a custom event
pub fn custom_rejected_error(name: &EventName) -> String {
    format!("[ERROR] event '{}' is not recognized by the remote daemon", name)
}

/// Summary of what was registered, in request order
pub fn summary_line(registered: &[EventName]) -> String {
    let names: Vec<&str> = registered.iter().map(|n| n.as_str()).collect();
    format!("registered for the following events: {}", names.join(" "))
}

/// Registers event names against a live channel
#[derive(Debug, Clone)]
pub struct SubscriptionManager {
    logger: TimestampedLogger,
}

impl SubscriptionManager {
    pub fn new(logger: TimestampedLogger) -> Self {
        Self { logger }
    }

    /// Try to register one name and classify the result
    pub async fn register<C: ControlChannel + ?Sized>(&self, channel: &C, name: &EventName) -> Registration {
        let keyword = match name.encode() {
            Ok(k) => k,
            Err(source) => {
                debug!(%name, error = %source, "register: cannot encode");
                return Registration::Fatal(SubscriptionError::Unencodable {
                    name: name.to_string(),
                    source,
                });
            }
        };

        match channel.add_event_listener(keyword).await {
            Ok(()) => Registration::Registered,
            Err(e) if e.is_rejection() && !name.is_custom() => Registration::Rejected(e),
            Err(e) if e.is_rejection() => Registration::Fatal(SubscriptionError::CustomRejected {
                name: name.to_string(),
                source: e,
            }),
            Err(e) => Registration::Fatal(SubscriptionError::Channel {
                name: name.to_string(),
                source: e,
            }),
        }
    }

    /// Register every name in order and write the summary line
    ///
    /// Returns the successfully registered names. On a fatal failure an
    /// error line goes to both the event log and the operator stream and no
    /// summary is written.
    pub async fn subscribe_all<C: ControlChannel + ?Sized>(
        &self,
        channel: &C,
        names: &[EventName],
    ) -> Result<Vec<EventName>, SubscriptionError> {
        debug!(count = names.len(), "SubscriptionManager::subscribe_all: called");
        let mut registered = Vec::with_capacity(names.len());

        for name in names {
            match self.register(channel, name).await {
                Registration::Registered => {
                    debug!(%name, "subscribe_all: registered");
                    registered.push(name.clone());
                }
                Registration::Rejected(e) => {
                    warn!(%name, error = %e, "Daemon does not support event");
                    self.logger.log(Destination::File, &unsupported_warning(name))?;
                }
                Registration::Fatal(err) => {
                    let message = match &err {
                        SubscriptionError::CustomRejected { .. } => custom_rejected_error(name),
                        other => format!("[ERROR] {}", other),
                    };
                    self.logger.log_best_effort(Destination::Both, &message);
                    return Err(err);
                }
            }
        }

        self.logger.log(Destination::File, &summary_line(&registered))?;
        info!(count = registered.len(), "Event subscriptions registered");
        Ok(registered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::mock::MockControlChannel;
    use crate::events::{EventType, requested_events};
    use crate::logger::LogSink;
    use crate::logger::testing::{FailingWriter, SharedBuffer};
    use std::path::PathBuf;

    fn logger() -> (SharedBuffer, SharedBuffer, TimestampedLogger) {
        let file = SharedBuffer::default();
        let operator = SharedBuffer::default();
        let logger = TimestampedLogger::with_sinks(
            PathBuf::from("/tmp/events.log"),
            LogSink::from_writer("file", file.clone()),
            LogSink::from_writer("operator", operator.clone()),
        );
        (file, operator, logger)
    }

    fn messages(buffer: &SharedBuffer) -> Vec<String> {
        // Drop "date time epoch " prefix.
        buffer
            .contents()
            .lines()
            .map(|l| l.splitn(4, ' ').nth(3).unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_all_supported() {
        let (file, operator, logger) = logger();
        let channel = MockControlChannel::new(&["CIRC", "BW"]);
        let names = requested_events(&[EventType::Circ, EventType::Bw], &[]);

        let registered = SubscriptionManager::new(logger).subscribe_all(&channel, &names).await.unwrap();

        assert_eq!(registered, names);
        assert_eq!(messages(&file), vec!["registered for the following events: CIRC BW"]);
        assert!(operator.contents().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_well_known_warns_and_continues() {
        let (file, operator, logger) = logger();
        let channel = MockControlChannel::new(&["CIRC", "STREAM"]);
        let names = requested_events(
            &[EventType::Circ, EventType::HsDesc, EventType::Stream, EventType::CellStats],
            &[],
        );

        let registered = SubscriptionManager::new(logger).subscribe_all(&channel, &names).await.unwrap();

        assert_eq!(
            registered,
            vec![EventName::WellKnown(EventType::Circ), EventName::WellKnown(EventType::Stream)]
        );
        assert_eq!(
            messages(&file),
            vec![
                "[WARNING] event 'HS_DESC' is recognized locally but not by the remote daemon",
                "[WARNING] event 'CELL_STATS' is recognized locally but not by the remote daemon",
                "registered for the following events: CIRC STREAM",
            ]
        );
        assert!(operator.contents().is_empty());
        assert_eq!(channel.attempts(), vec!["CIRC", "HS_DESC", "STREAM", "CELL_STATS"]);
    }

    #[tokio::test]
    async fn test_summary_keeps_request_order_with_many_rejections() {
        let (file, _, logger) = logger();
        let channel = MockControlChannel::new(&["BW", "ORCONN"]);
        let names = requested_events(
            &[
                EventType::Guard,
                EventType::Orconn,
                EventType::TbEmpty,
                EventType::Bw,
                EventType::CircMinor,
            ],
            &[],
        );

        SubscriptionManager::new(logger).subscribe_all(&channel, &names).await.unwrap();

        let lines = messages(&file);
        assert_eq!(lines.iter().filter(|l| l.starts_with("[WARNING]")).count(), 3);
        assert_eq!(lines.last().unwrap(), "registered for the following events: ORCONN BW");
    }

    #[tokio::test]
    async fn test_custom_rejected_is_fatal() {
        let (file, operator, logger) = logger();
        let channel = MockControlChannel::new(&["CIRC", "BW"]);
        let names = requested_events(&[EventType::Circ], &["BOGUS".to_string(), "BW".to_string()]);

        let err = SubscriptionManager::new(logger)
            .subscribe_all(&channel, &names)
            .await
            .unwrap_err();

        assert!(matches!(err, SubscriptionError::CustomRejected { ref name, .. } if name == "BOGUS"));
        let file_lines = messages(&file);
        assert_eq!(
            file_lines,
            vec!["[ERROR] event 'BOGUS' is not recognized by the remote daemon"]
        );
        assert!(operator.contents().contains("[ERROR] event 'BOGUS' is not recognized by the remote daemon"));
        assert!(!file.contents().contains("registered for the following events"));
        // Nothing after the fatal name is attempted.
        assert_eq!(channel.attempts(), vec!["CIRC", "BOGUS"]);
    }

    #[tokio::test]
    async fn test_custom_accepted_by_daemon() {
        let (file, _, logger) = logger();
        let channel = MockControlChannel::new(&["CIRC", "CONN_BW", "PT_LOG"]);
        let names = requested_events(&[EventType::Circ], &["PT_LOG".to_string()]);

        let registered = SubscriptionManager::new(logger).subscribe_all(&channel, &names).await.unwrap();

        assert_eq!(registered.len(), 2);
        assert!(registered[1].is_custom());
        assert_eq!(messages(&file), vec!["registered for the following events: CIRC PT_LOG"]);
    }

    #[tokio::test]
    async fn test_unencodable_custom_is_fatal_without_round_trip() {
        let (file, operator, logger) = logger();
        let channel = MockControlChannel::new(&["CIRC"]);
        let names = requested_events(&[], &["TWO WORDS".to_string()]);

        let err = SubscriptionManager::new(logger)
            .subscribe_all(&channel, &names)
            .await
            .unwrap_err();

        assert!(matches!(err, SubscriptionError::Unencodable { .. }));
        assert!(channel.attempts().is_empty());
        assert!(file.contents().contains("[ERROR]"));
        assert!(operator.contents().contains("[ERROR]"));
    }

    #[tokio::test]
    async fn test_channel_loss_is_fatal_even_for_well_known() {
        let (_, _, logger) = logger();
        let channel = MockControlChannel::new(&["CIRC"]);
        channel.drop_connection();

        let err = SubscriptionManager::new(logger)
            .subscribe_all(&channel, &requested_events(&[EventType::Circ], &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, SubscriptionError::Channel { .. }));
    }

    #[tokio::test]
    async fn test_duplicates_attempted_independently() {
        let (file, _, logger) = logger();
        let channel = MockControlChannel::new(&["CIRC"]);
        let names = requested_events(&[EventType::Circ, EventType::Circ], &[]);

        let registered = SubscriptionManager::new(logger).subscribe_all(&channel, &names).await.unwrap();

        assert_eq!(registered.len(), 2);
        assert_eq!(channel.attempts(), vec!["CIRC", "CIRC"]);
        assert_eq!(channel.registered_events(), vec!["CIRC"]);
        assert_eq!(messages(&file), vec!["registered for the following events: CIRC CIRC"]);
    }

    #[tokio::test]
    async fn test_warning_write_failure_is_surfaced() {
        let operator = SharedBuffer::default();
        let logger = TimestampedLogger::with_sinks(
            PathBuf::from("/tmp/events.log"),
            LogSink::from_writer("file", FailingWriter),
            LogSink::from_writer("operator", operator),
        );
        let channel = MockControlChannel::new(&[]);

        let err = SubscriptionManager::new(logger)
            .subscribe_all(&channel, &requested_events(&[EventType::Circ], &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, SubscriptionError::Log(_)));
    }

    #[test]
    fn test_summary_line_empty() {
        assert_eq!(summary_line(&[]), "registered for the following events: ");
    }
}
