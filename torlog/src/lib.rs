//! tor-ctl-logger - Tor control-port event logger
//!
//! Connects to a running Tor daemon's control port, subscribes to a set of
//! asynchronous events, and appends every notification to a timestamped log
//! file until the operator interrupts it.
//!
//! # Modules
//!
//! - [`logger`] - Timestamped line logger over the event file and stderr
//! - [`control`] - Control channel trait and TCP implementation
//! - [`events`] - Event names and the dispatcher that logs notifications
//! - [`subscription`] - Per-event registration with warning/fatal policy
//! - [`heartbeat`] - Periodic log-size report on the operator stream
//! - [`session`] - Connect, authenticate, subscribe, run, terminate
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod control;
pub mod events;
pub mod heartbeat;
pub mod logger;
pub mod session;
pub mod subscription;

pub use cli::Cli;
pub use config::Config;
pub use control::{ControlChannel, ControlError, ControlEvent, Credentials, TcpControlChannel};
pub use events::{EventDispatcher, EventName, EventType};
pub use logger::{Destination, LogError, TimestampedLogger};
pub use session::{Session, SessionConfig, SessionError, SessionState};
pub use subscription::{SubscriptionError, SubscriptionManager};
