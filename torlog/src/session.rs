//! Session Lifecycle
//!
//! ```text
//! Disconnected → Connected → Authenticated → Subscribed → Running → Terminating → Disconnected
//! ```
//!
//! Setup failures go straight to `Terminating`. An operator interrupt at any
//! point also goes to `Terminating`, but counts as success. The channel is
//! released exactly once on every path that reached `Connected`.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::control::{ControlChannel, ControlError, Credentials, DEFAULT_TIMEOUT, TcpControlChannel};
use crate::events::{EventDispatcher, EventName};
use crate::heartbeat::{DEFAULT_HEARTBEAT_INTERVAL, HeartbeatExit, LivenessReporter};
use crate::logger::{Destination, LogError, TimestampedLogger};
use crate::subscription::{SubscriptionError, SubscriptionManager};

/// Program name used in the banner and the default log file name
pub const PROGRAM_NAME: &str = "tor-ctl-logger";

/// Fatal session failures
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect to control port {port}: {source}")]
    Connect { port: u16, source: ControlError },

    #[error("failed to authenticate to control port {port}: {source}")]
    Authenticate { port: u16, source: ControlError },

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error("control channel closed by the remote daemon")]
    ChannelLost,

    #[error(transparent)]
    Log(#[from] LogError),
}

/// Lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Authenticated,
    Subscribed,
    Running,
    Terminating,
}

/// Everything a session needs to run
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub log_path: PathBuf,
    pub events: Vec<EventName>,
    pub credentials: Credentials,
    pub heartbeat_interval: Duration,
    pub timeout: Duration,
}

impl SessionConfig {
    pub fn new(port: u16, log_path: impl Into<PathBuf>, events: Vec<EventName>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port,
            log_path: log_path.into(),
            events,
            credentials: Credentials::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Banner written to both sinks at startup
pub fn startup_banner(config: &SessionConfig) -> String {
    format!(
        "started {} on port {}, logging events to {}",
        PROGRAM_NAME,
        config.port,
        config.log_path.display()
    )
}

/// Run `fut` unless `cancel` fires first
async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

/// One control-port session
pub struct Session {
    config: SessionConfig,
    logger: TimestampedLogger,
    state: SessionState,
    history: Vec<SessionState>,
    registered: Vec<EventName>,
    dispatcher: EventDispatcher,
}

impl Session {
    pub fn new(config: SessionConfig, logger: TimestampedLogger) -> Self {
        let dispatcher = EventDispatcher::new(logger.file().clone(), logger.operator().clone());
        Self {
            config,
            logger,
            state: SessionState::Disconnected,
            history: vec![SessionState::Disconnected],
            registered: Vec::new(),
            dispatcher,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state entered, in order
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    /// Events the daemon accepted
    pub fn registered(&self) -> &[EventName] {
        &self.registered
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "Session::transition");
        self.state = next;
        self.history.push(next);
    }

    fn fail(&self, message: &str) {
        error!("{}", message);
        self.logger.log_best_effort(Destination::Both, &format!("[ERROR] {}", message));
    }

    /// Write the banner, connect over TCP, and run until interrupted
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<(), SessionError> {
        self.logger.log(Destination::Both, &startup_banner(&self.config))?;

        let connect = TcpControlChannel::connect_with_timeout(&self.config.host, self.config.port, self.config.timeout);
        let connected = until_cancelled(cancel, connect).await;
        let channel = match connected {
            None => {
                info!("Interrupted before connecting");
                return Ok(());
            }
            Some(Ok(channel)) => channel,
            Some(Err(source)) => {
                let err = SessionError::Connect {
                    port: self.config.port,
                    source,
                };
                self.fail(&err.to_string());
                return Err(err);
            }
        };

        // Dropping `channel` after this also stops its reader task.
        self.run_with(&channel, cancel).await
    }

    /// Run the lifecycle on an already connected channel
    pub async fn run_with<C: ControlChannel + ?Sized>(
        &mut self,
        channel: &C,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        self.transition(SessionState::Connected);
        let result = self.drive(channel, cancel).await;

        self.transition(SessionState::Terminating);
        if let Err(e) = channel.close().await {
            debug!(error = %e, "Session: close reported an error");
        }
        self.transition(SessionState::Disconnected);

        match &result {
            Ok(()) => info!("Session ended by operator"),
            Err(e) => info!(error = %e, "Session ended with error"),
        }
        result
    }

    async fn drive<C: ControlChannel + ?Sized>(&mut self, channel: &C, cancel: &CancellationToken) -> Result<(), SessionError> {
        let port = self.config.port;

        let authenticated = until_cancelled(cancel, channel.authenticate(&self.config.credentials)).await;
        match authenticated {
            None => return Ok(()),
            Some(Ok(info)) => debug!(version = ?info.tor_version, "Session: authenticated"),
            Some(Err(source)) => {
                let err = SessionError::Authenticate { port, source };
                self.fail(&err.to_string());
                return Err(err);
            }
        }
        self.transition(SessionState::Authenticated);

        self.dispatcher.attach(channel);
        let manager = SubscriptionManager::new(self.logger.clone());
        let subscribed = until_cancelled(cancel, manager.subscribe_all(channel, &self.config.events)).await;
        match subscribed {
            None => return Ok(()),
            Some(result) => self.registered = result?,
        }
        self.transition(SessionState::Subscribed);

        let reporter = LivenessReporter::new(
            self.logger.path(),
            self.config.heartbeat_interval,
            self.logger.operator().clone(),
        );
        self.transition(SessionState::Running);
        match reporter.run(cancel, channel.wait_closed()).await {
            HeartbeatExit::Cancelled => Ok(()),
            HeartbeatExit::ChannelLost => {
                let err = SessionError::ChannelLost;
                self.fail(&err.to_string());
                Err(err)
            }
        }
    }
}

/// Open the event log, run one session, and close the log
pub async fn run(config: SessionConfig, cancel: &CancellationToken) -> Result<(), SessionError> {
    let logger = TimestampedLogger::open(&config.log_path)?;
    let mut session = Session::new(config, logger.clone());
    let result = session.run(cancel).await;
    logger.close();
    result
}
