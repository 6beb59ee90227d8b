//! Calculated-values (bar) channel models.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Deserialize;

use super::Topic;

/// An aggregated-period record with its derived indicator values.
///
/// The period-start `timestamp` identifies the period: two bars of the same
/// topic with equal timestamps describe the same period.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Bar {
    #[serde(default, alias = "symbol")]
    pub instrument: Option<String>,
    #[serde(default, alias = "timeframe")]
    pub granularity: Option<String>,
    /// Start of the aggregation period, e.g. `"2026-01-20T07:00:00"`.
    pub timestamp: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// `true` while the period is still accumulating.
    #[serde(default, alias = "is_forming")]
    pub forming: bool,
    /// Indicator values keyed by name. Opaque to the engine.
    #[serde(flatten)]
    pub indicators: BTreeMap<String, serde_json::Value>,
}

impl Bar {
    /// Returns the topic carried in the payload, if both halves are present.
    pub fn topic(&self) -> Option<Topic> {
        match (&self.instrument, &self.granularity) {
            (Some(instrument), Some(granularity)) => Some(Topic::new(instrument, granularity)),
            _ => None,
        }
    }

    /// Copies indicator values from `other` that this bar does not carry.
    ///
    /// Existing values and OHLC fields are never overwritten.
    pub fn fill_missing_indicators(&mut self, other: &Bar) {
        for (name, value) in &other.indicators {
            self.indicators
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
    }
}
