//! Mock control channel for unit tests

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{AuthMethod, ControlChannel, ControlError, ControlEvent, Credentials, EventHandler, ProtocolInfo};

/// In-memory daemon that accepts a fixed set of event keywords
pub struct MockControlChannel {
    supported: HashSet<String>,
    auth_error: Option<String>,
    handler: Mutex<Option<EventHandler>>,
    registered: Mutex<Vec<String>>,
    attempts: Mutex<Vec<String>>,
    close_count: AtomicUsize,
    closed: CancellationToken,
}

impl MockControlChannel {
    pub fn new(supported: &[&str]) -> Self {
        debug!(?supported, "MockControlChannel::new: called");
        Self {
            supported: supported.iter().map(|s| s.to_string()).collect(),
            auth_error: None,
            handler: Mutex::new(None),
            registered: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
            close_count: AtomicUsize::new(0),
            closed: CancellationToken::new(),
        }
    }

    pub fn with_auth_error(mut self, message: &str) -> Self {
        self.auth_error = Some(message.to_string());
        self
    }

    /// Push a notification through the installed handler
    pub fn emit(&self, raw: &str) -> bool {
        let handler = self.handler.lock().unwrap().clone();
        match handler {
            Some(h) => {
                h(ControlEvent::new(raw));
                true
            }
            None => false,
        }
    }

    /// Simulate the daemon hanging up
    pub fn drop_connection(&self) {
        self.closed.cancel();
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    /// Every keyword passed to `add_event_listener`, in order
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn has_handler(&self) -> bool {
        self.handler.lock().unwrap().is_some()
    }
}

#[async_trait]
impl ControlChannel for MockControlChannel {
    async fn authenticate(&self, _credentials: &Credentials) -> Result<ProtocolInfo, ControlError> {
        if let Some(message) = &self.auth_error {
            return Err(ControlError::Authentication(message.clone()));
        }
        Ok(ProtocolInfo {
            auth_methods: vec![AuthMethod::Null],
            cookie_file: None,
            tor_version: Some("0.4.8.9".to_string()),
        })
    }

    fn set_event_handler(&self, handler: EventHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    async fn add_event_listener(&self, event: &str) -> Result<(), ControlError> {
        self.attempts.lock().unwrap().push(event.to_string());
        if self.closed.is_cancelled() {
            return Err(ControlError::Closed);
        }
        if !self.supported.contains(event) {
            return Err(ControlError::Rejected {
                code: 552,
                message: format!("Unrecognized event \"{}\"", event),
            });
        }
        let mut registered = self.registered.lock().unwrap();
        if !registered.iter().any(|e| e == event) {
            registered.push(event.to_string());
        }
        Ok(())
    }

    fn registered_events(&self) -> Vec<String> {
        self.registered.lock().unwrap().clone()
    }

    async fn wait_closed(&self) {
        self.closed.cancelled().await;
    }

    async fn close(&self) -> Result<(), ControlError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.closed.cancel();
        Ok(())
    }
}
