//! Event names and dispatch
//!
//! ```text
//!   daemon ──650──▶ control reader task ──▶ EventDispatcher ──▶ event log
//! ```
//!
//! - [`EventType`] is the closed set of well-known keywords, [`EventName`]
//!   adds an open slot for custom keywords.
//! - [`EventDispatcher`] is the callback the control channel invokes per
//!   notification.

mod dispatcher;
mod types;

pub use dispatcher::EventDispatcher;
pub use types::{EventName, EventNameError, EventType, requested_events};
