//! Shared models for the push channel and the historical query service.
//!
//! Contains the [`Topic`] key, client-to-server control requests, and the
//! server-to-client [`ServerEvent`] envelope.

pub mod bar;
pub mod history;
pub mod log;
pub mod tick;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::MeridianError;

pub use bar::Bar;
pub use history::{HistoryPage, HistoryRequest};
pub use log::LogEntry;
pub use tick::Tick;

/// Identity of one subscribable data stream: an instrument at a granularity.
///
/// Serialized on the wire as `"INSTRUMENT:GRANULARITY"`, e.g. `"XAUUSD:H1"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic {
    instrument: String,
    granularity: String,
}

impl Topic {
    pub fn new(instrument: impl Into<String>, granularity: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            granularity: granularity.into(),
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn granularity(&self) -> &str {
        &self.granularity
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.instrument, self.granularity)
    }
}

impl FromStr for Topic {
    type Err = MeridianError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once(':') {
            Some((instrument, granularity))
                if !instrument.is_empty()
                    && !granularity.is_empty()
                    && !granularity.contains(':') =>
            {
                Ok(Topic::new(instrument, granularity))
            }
            _ => Err(MeridianError::MalformedMessage(format!(
                "topic must look like INSTRUMENT:GRANULARITY, got {s:?}"
            ))),
        }
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Control verbs understood by the push server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Subscribe,
    Unsubscribe,
    Ping,
}

/// A client-to-server control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlRequest {
    pub action: Action,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<Topic>,
}

impl ControlRequest {
    pub fn subscribe(topics: Vec<Topic>) -> Self {
        Self {
            action: Action::Subscribe,
            topics,
        }
    }

    pub fn unsubscribe(topics: Vec<Topic>) -> Self {
        Self {
            action: Action::Unsubscribe,
            topics,
        }
    }

    pub fn ping() -> Self {
        Self {
            action: Action::Ping,
            topics: Vec::new(),
        }
    }
}

/// A server-to-client push event, discriminated by its `type` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Latest ticks keyed by instrument (or full topic key).
    ///
    /// Entries stay as raw JSON so one malformed tick does not discard the
    /// rest of the batch.
    Ticks {
        data: BTreeMap<String, serde_json::Value>,
    },
    /// A recomputed bar with its indicator values.
    CalculatedValues {
        data: Bar,
        #[serde(default)]
        is_forming: Option<bool>,
        #[serde(default)]
        topic: Option<String>,
    },
    /// Incremental trade log entries for the current period.
    TradeLog {
        #[serde(default)]
        logs: Vec<LogEntry>,
        #[serde(default)]
        topic: Option<String>,
    },
    /// Server-side failure report.
    Error { message: String },
    /// Reply to a keep-alive ping.
    Pong,
}
