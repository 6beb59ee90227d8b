//! Tick channel models.

use rust_decimal::Decimal;
use serde::Deserialize;

/// A point-in-time price observation for one instrument.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Tick {
    pub bid: Decimal,
    pub ask: Decimal,
    /// Last traded price.
    pub last: Decimal,
    /// Daily high.
    pub high: Decimal,
    /// Daily low.
    pub low: Decimal,
    /// Daily open.
    pub open: Decimal,
    /// Server-assigned timestamp in milliseconds since the Unix epoch.
    #[serde(alias = "time")]
    pub timestamp: i64,
    /// Set by the server when the feed could not produce a valid quote.
    #[serde(default)]
    pub error: bool,
}

impl Tick {
    /// Returns `true` if the server flagged this tick as invalid.
    pub fn is_errored(&self) -> bool {
        self.error
    }
}
