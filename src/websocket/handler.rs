//! Incoming push-channel message decoding.

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::MeridianError;
use crate::models::{ServerEvent, Tick};
use crate::Result;

/// Decodes one text frame into a [`ServerEvent`].
///
/// # Errors
///
/// Returns [`MeridianError::MalformedMessage`] if the frame is not JSON or
/// its `type` is unknown.
pub fn parse_server_event(text: &str) -> Result<ServerEvent> {
    serde_json::from_str(text).map_err(|e| MeridianError::MalformedMessage(e.to_string()))
}

/// Decodes the entries of a `ticks` event, skipping the malformed ones.
///
/// Errored ticks are returned as decoded; filtering them is the buffer's job.
pub fn decode_ticks(data: BTreeMap<String, serde_json::Value>) -> Vec<(String, Tick)> {
    data.into_iter()
        .filter_map(|(key, raw)| match serde_json::from_value::<Tick>(raw) {
            Ok(tick) => Some((key, tick)),
            Err(e) => {
                warn!(key, error = %e, "Dropping malformed tick");
                None
            }
        })
        .collect()
}
