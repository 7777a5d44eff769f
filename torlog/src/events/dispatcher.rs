//! Event Dispatcher - forwards daemon notifications to the event log
//!
//! The dispatcher installs one callback on the control channel. The channel
//! calls it once per asynchronous notification, in receipt order; the
//! callback writes the raw content to the event log and returns.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::control::{ControlChannel, ControlEvent, EventHandler};
use crate::logger::LogSink;

/// Forwards every notification, unmodified, to the event log
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    file: Arc<LogSink>,
    operator: Arc<LogSink>,
    forwarded: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl EventDispatcher {
    pub fn new(file: Arc<LogSink>, operator: Arc<LogSink>) -> Self {
        Self {
            file,
            operator,
            forwarded: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Log one notification
    pub fn dispatch(&self, event: &ControlEvent) {
        debug!(event_type = ?event.event_type(), "EventDispatcher::dispatch");
        let body = event.raw_content().trim_end_matches(['\r', '\n']);

        match self.file.write_line(body) {
            Ok(()) => {
                self.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "EventDispatcher: failed to log event");
                let _ = self.operator.write_line(&format!("[ERROR] failed to log event: {}", e));
            }
        }
    }

    /// Callback suitable for [`ControlChannel::set_event_handler`]
    pub fn handler(&self) -> EventHandler {
        let dispatcher = self.clone();
        Arc::new(move |event: ControlEvent| dispatcher.dispatch(&event))
    }

    /// Install the callback on a channel
    pub fn attach<C: ControlChannel + ?Sized>(&self, channel: &C) {
        debug!("EventDispatcher::attach: installing handler");
        channel.set_event_handler(self.handler());
    }

    /// Events written to the log so far
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Events that could not be written
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::mock::MockControlChannel;
    use crate::logger::testing::{FailingWriter, SharedBuffer};
    use regex::Regex;
    use std::thread;

    fn sinks() -> (SharedBuffer, SharedBuffer, EventDispatcher) {
        let file = SharedBuffer::default();
        let operator = SharedBuffer::default();
        let dispatcher = EventDispatcher::new(
            Arc::new(LogSink::from_writer("file", file.clone())),
            Arc::new(LogSink::from_writer("operator", operator.clone())),
        );
        (file, operator, dispatcher)
    }

    #[test]
    fn test_forwards_raw_content_without_terminator() {
        let (file, operator, dispatcher) = sinks();
        dispatcher.dispatch(&ControlEvent::new("650 BW 1024 2048\r\n"));

        let content = file.contents();
        assert!(content.ends_with(" 650 BW 1024 2048\n"), "got {content:?}");
        assert_eq!(content.lines().count(), 1);
        assert!(operator.contents().is_empty());
        assert_eq!(dispatcher.forwarded(), 1);
    }

    #[test]
    fn test_multiline_event_kept_intact() {
        let (file, _, dispatcher) = sinks();
        dispatcher.dispatch(&ControlEvent::new("650+NS\r\nr relay\r\n.\r\n650 OK\r\n"));
        assert!(file.contents().contains("650+NS\r\nr relay\r\n.\r\n650 OK\n"));
    }

    #[test]
    fn test_write_failure_reported_to_operator() {
        let operator = SharedBuffer::default();
        let dispatcher = EventDispatcher::new(
            Arc::new(LogSink::from_writer("file", FailingWriter)),
            Arc::new(LogSink::from_writer("operator", operator.clone())),
        );

        dispatcher.dispatch(&ControlEvent::new("650 CIRC 1 BUILT\r\n"));
        assert_eq!(dispatcher.failed(), 1);
        assert_eq!(dispatcher.forwarded(), 0);
        assert!(operator.contents().contains("[ERROR] failed to log event"));
    }

    #[test]
    fn test_attach_routes_channel_events() {
        let (file, _, dispatcher) = sinks();
        let channel = MockControlChannel::new(&["CIRC"]);
        assert!(!channel.emit("650 CIRC 1 LAUNCHED"));

        dispatcher.attach(&channel);
        assert!(channel.emit("650 CIRC 1 LAUNCHED"));
        assert!(channel.emit("650 CIRC 1 BUILT"));

        let content = file.contents();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("650 CIRC 1 LAUNCHED"));
        assert!(lines[1].ends_with("650 CIRC 1 BUILT"));
    }

    #[test]
    fn test_concurrent_deliveries_produce_whole_lines() {
        let (file, _, dispatcher) = sinks();
        let handler = dispatcher.handler();
        let n = 500;

        let handles: Vec<_> = (0..n)
            .map(|i| {
                let handler = handler.clone();
                thread::spawn(move || handler(ControlEvent::new(format!("650 STREAM {i} NEW 0 example.com:80\r\n"))))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let re = Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2} \d+\.\d{2} 650 STREAM \d+ NEW 0 example\.com:80$").unwrap();
        let content = file.contents();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), n);
        assert!(lines.iter().all(|l| re.is_match(l)));
        assert_eq!(dispatcher.forwarded(), n as u64);
    }
}
