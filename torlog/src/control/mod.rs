//! Control-port client
//!
//! The subscription and session code only talks to the daemon through the
//! [`ControlChannel`] trait: authenticate, register an event handler, add
//! event subscriptions one at a time, and wait for the connection to drop.
//! [`TcpControlChannel`] implements it over TCP; tests use `mock`.
//!
//! ```text
//!   TcpControlChannel ──commands──▶ daemon
//!        ▲  reader task ◀──replies── daemon
//!        │      │
//!        │      ├── 650 replies ──▶ EventHandler (dispatcher)
//!        └──────┴── other replies ─▶ pending command
//! ```

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

mod client;
mod protocolinfo;
mod reply;

#[cfg(test)]
pub mod mock;

pub use client::{DEFAULT_TIMEOUT, TcpControlChannel};
pub use protocolinfo::{AuthMethod, ProtocolInfo};
pub use reply::{ASYNC_EVENT_CODE, LineKind, Reply, ReplyLine, quote, read_reply};

/// Errors from the control channel
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: String, source: io::Error },

    #[error("control channel I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("daemon rejected command ({code}): {message}")]
    Rejected { code: u16, message: String },

    #[error("control protocol error: {0}")]
    Protocol(String),

    #[error("control channel closed")]
    Closed,
}

impl ControlError {
    /// True when the daemon answered and said no, as opposed to a channel failure
    pub fn is_rejection(&self) -> bool {
        matches!(self, ControlError::Rejected { .. })
    }
}

/// Credentials offered during authentication
#[derive(Clone, Default)]
pub struct Credentials {
    pub password: Option<String>,
    /// Overrides the cookie file path advertised by the daemon
    pub cookie_path: Option<PathBuf>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("cookie_path", &self.cookie_path)
            .finish()
    }
}

/// One asynchronous notification from the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEvent {
    raw: String,
}

impl ControlEvent {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// The notification exactly as received
    pub fn raw_content(&self) -> &str {
        &self.raw
    }

    /// Event keyword, e.g. `CIRC` for `650 CIRC 5 BUILT ...`
    pub fn event_type(&self) -> Option<&str> {
        self.raw.get(4..)?.split([' ', '\r', '\n']).next().filter(|s| !s.is_empty())
    }
}

impl From<&Reply> for ControlEvent {
    fn from(reply: &Reply) -> Self {
        Self::new(reply.raw_content())
    }
}

/// Callback invoked once per asynchronous notification, in receipt order
pub type EventHandler = Arc<dyn Fn(ControlEvent) + Send + Sync>;

/// A live control-port connection
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Authenticate the connection; returns what the daemon advertised
    async fn authenticate(&self, credentials: &Credentials) -> Result<ProtocolInfo, ControlError>;

    /// Install the callback for asynchronous notifications
    fn set_event_handler(&self, handler: EventHandler);

    /// Add one event keyword to the active subscription set
    ///
    /// On rejection the active set is left unchanged.
    async fn add_event_listener(&self, event: &str) -> Result<(), ControlError>;

    /// Keywords currently subscribed
    fn registered_events(&self) -> Vec<String>;

    /// Resolves once the connection is gone
    async fn wait_closed(&self);

    /// Release the connection; later calls are no-ops
    async fn close(&self) -> Result<(), ControlError>;
}
