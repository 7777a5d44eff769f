//! Event name types
//!
//! Well-known events form a closed enumeration that is validated before any
//! subscription is attempted. Custom events are carried verbatim and the
//! remote daemon decides whether they exist.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from parsing or encoding event names
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventNameError {
    #[error("unrecognized event '{0}' (use --custom-events for names outside the known list)")]
    Unrecognized(String),

    #[error("event name is empty")]
    Empty,

    #[error("event name '{0}' contains characters that cannot be sent to the control port")]
    Unencodable(String),
}

/// Asynchronous event types recognized by the control protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    Addrmap,
    AuthdirNewdescs,
    BuildtimeoutSet,
    Bw,
    CellStats,
    Circ,
    CircBw,
    CircMinor,
    ClientsSeen,
    ConfChanged,
    ConnBw,
    Debug,
    Descchanged,
    Err,
    Guard,
    HsDesc,
    HsDescContent,
    Info,
    NetworkLiveness,
    Newconsensus,
    Newdesc,
    Notice,
    Ns,
    Orconn,
    Signal,
    StatusClient,
    StatusGeneral,
    StatusServer,
    Stream,
    StreamBw,
    TbEmpty,
    TransportLaunched,
    Warn,
}

impl EventType {
    /// Every well-known event type, in protocol keyword order
    pub const ALL: &'static [EventType] = &[
        EventType::Addrmap,
        EventType::AuthdirNewdescs,
        EventType::BuildtimeoutSet,
        EventType::Bw,
        EventType::CellStats,
        EventType::Circ,
        EventType::CircBw,
        EventType::CircMinor,
        EventType::ClientsSeen,
        EventType::ConfChanged,
        EventType::ConnBw,
        EventType::Debug,
        EventType::Descchanged,
        EventType::Err,
        EventType::Guard,
        EventType::HsDesc,
        EventType::HsDescContent,
        EventType::Info,
        EventType::NetworkLiveness,
        EventType::Newconsensus,
        EventType::Newdesc,
        EventType::Notice,
        EventType::Ns,
        EventType::Orconn,
        EventType::Signal,
        EventType::StatusClient,
        EventType::StatusGeneral,
        EventType::StatusServer,
        EventType::Stream,
        EventType::StreamBw,
        EventType::TbEmpty,
        EventType::TransportLaunched,
        EventType::Warn,
    ];

    /// The keyword sent in SETEVENTS and seen in 650 replies
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Addrmap => "ADDRMAP",
            EventType::AuthdirNewdescs => "AUTHDIR_NEWDESCS",
            EventType::BuildtimeoutSet => "BUILDTIMEOUT_SET",
            EventType::Bw => "BW",
            EventType::CellStats => "CELL_STATS",
            EventType::Circ => "CIRC",
            EventType::CircBw => "CIRC_BW",
            EventType::CircMinor => "CIRC_MINOR",
            EventType::ClientsSeen => "CLIENTS_SEEN",
            EventType::ConfChanged => "CONF_CHANGED",
            EventType::ConnBw => "CONN_BW",
            EventType::Debug => "DEBUG",
            EventType::Descchanged => "DESCCHANGED",
            EventType::Err => "ERR",
            EventType::Guard => "GUARD",
            EventType::HsDesc => "HS_DESC",
            EventType::HsDescContent => "HS_DESC_CONTENT",
            EventType::Info => "INFO",
            EventType::NetworkLiveness => "NETWORK_LIVENESS",
            EventType::Newconsensus => "NEWCONSENSUS",
            EventType::Newdesc => "NEWDESC",
            EventType::Notice => "NOTICE",
            EventType::Ns => "NS",
            EventType::Orconn => "ORCONN",
            EventType::Signal => "SIGNAL",
            EventType::StatusClient => "STATUS_CLIENT",
            EventType::StatusGeneral => "STATUS_GENERAL",
            EventType::StatusServer => "STATUS_SERVER",
            EventType::Stream => "STREAM",
            EventType::StreamBw => "STREAM_BW",
            EventType::TbEmpty => "TB_EMPTY",
            EventType::TransportLaunched => "TRANSPORT_LAUNCHED",
            EventType::Warn => "WARN",
        }
    }

    /// Default subscription set: everything except DEBUG log messages
    pub fn defaults() -> Vec<EventType> {
        Self::ALL.iter().copied().filter(|e| *e != EventType::Debug).collect()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EventNameError;

    fn from_str(s: &str) -> Result<Self, EventNameError> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == wanted)
            .ok_or_else(|| {
                debug!(name = %s, "EventType::from_str: unrecognized");
                EventNameError::Unrecognized(s.to_string())
            })
    }
}

impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A requested event: either a well-known type or a custom keyword
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventName {
    WellKnown(EventType),
    Custom(String),
}

impl EventName {
    /// Keyword as sent to the daemon
    pub fn as_str(&self) -> &str {
        match self {
            EventName::WellKnown(e) => e.as_str(),
            EventName::Custom(s) => s,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, EventName::Custom(_))
    }

    /// Check the name can be sent as a single SETEVENTS token
    ///
    /// Well-known names always can. Custom names must be non-empty printable
    /// ASCII with no whitespace; nothing else is checked locally.
    pub fn encode(&self) -> Result<&str, EventNameError> {
        match self {
            EventName::WellKnown(e) => Ok(e.as_str()),
            EventName::Custom(s) => {
                if s.is_empty() {
                    return Err(EventNameError::Empty);
                }
                if !s.bytes().all(|b| b.is_ascii_graphic()) {
                    return Err(EventNameError::Unencodable(s.clone()));
                }
                Ok(s)
            }
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<EventType> for EventName {
    fn from(e: EventType) -> Self {
        EventName::WellKnown(e)
    }
}

/// Build the ordered request list: well-known names first, then custom names
pub fn requested_events(well_known: &[EventType], custom: &[String]) -> Vec<EventName> {
    well_known
        .iter()
        .copied()
        .map(EventName::WellKnown)
        .chain(custom.iter().cloned().map(EventName::Custom))
        .collect()
}
