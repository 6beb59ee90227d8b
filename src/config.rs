//! Application configuration loaded from environment variables.
//!
//! Every variable is optional:
//! - `MERIDIAN_WEBSOCKET_URL`: push channel endpoint
//! - `MERIDIAN_RECONNECT_DELAY_MS`: delay before each reconnect attempt
//! - `MERIDIAN_RECONNECT_BACKOFF`: `fixed` (default) or `exponential`
//! - `MERIDIAN_PING_INTERVAL_SECS`: keep-alive ping period
//! - `MERIDIAN_HISTORY_URL`: historical query endpoint
//! - `MERIDIAN_API_TOKEN`: bearer credential for the historical service
//! - `MERIDIAN_HISTORY_LIMIT`: bars loaded per view
//! - `MERIDIAN_BACKFILL_LIMIT`: bars fetched after a period rollover
//! - `MERIDIAN_FLUSH_INTERVAL_MS`: render cadence
//! - `MERIDIAN_TOPICS`: comma-separated `INSTRUMENT:GRANULARITY` list

use std::str::FromStr;
use std::time::Duration;

use crate::MeridianError;
use crate::models::Topic;
use crate::websocket::{ChannelSettings, ReconnectPolicy};

const DEFAULT_WEBSOCKET_URL: &str = "ws://127.0.0.1:8000/ws";
const DEFAULT_HISTORY_URL: &str = "http://127.0.0.1:8000/api/calculated-values";
const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;
const DEFAULT_PING_INTERVAL_SECS: u64 = 30;
const DEFAULT_HISTORY_LIMIT: u32 = 500;
const DEFAULT_BACKFILL_LIMIT: u32 = 3;
/// About 60 flushes per second.
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 16;
const DEFAULT_TOPICS: &str = "XAUUSD:H1";

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub channel: ChannelConfig,
    pub history: HistoryConfig,
    pub render: RenderConfig,
    /// Topics the binary opens views for.
    pub topics: Vec<Topic>,
}

/// Push channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub websocket_url: String,
    pub reconnect: ReconnectPolicy,
    pub ping_interval: Duration,
}

impl ChannelConfig {
    pub fn settings(&self) -> ChannelSettings {
        ChannelSettings {
            reconnect: self.reconnect,
            ping_interval: self.ping_interval,
        }
    }
}

/// Historical query service configuration.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub url: String,
    pub api_token: Option<String>,
    pub limit: u32,
    pub backfill_limit: u32,
}

/// Render cadence configuration.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub flush_interval: Duration,
}

/// Loads the application configuration from environment variables.
///
/// # Errors
///
/// Returns [`MeridianError::Config`] if a variable is set but cannot be
/// parsed, an interval or limit is zero, or a topic is malformed.
pub fn fetch_config() -> crate::Result<AppConfig> {
    config_from(non_empty_var)
}

/// Builds the configuration from an arbitrary variable lookup.
///
/// # Errors
///
/// See [`fetch_config`].
pub fn config_from<F>(lookup: F) -> crate::Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let websocket_url =
        lookup("MERIDIAN_WEBSOCKET_URL").unwrap_or_else(|| DEFAULT_WEBSOCKET_URL.to_string());
    let reconnect_delay = Duration::from_millis(positive(
        &lookup,
        "MERIDIAN_RECONNECT_DELAY_MS",
        DEFAULT_RECONNECT_DELAY_MS,
    )?);
    let reconnect = match lookup("MERIDIAN_RECONNECT_BACKOFF").as_deref() {
        None | Some("fixed") => ReconnectPolicy::Fixed(reconnect_delay),
        Some("exponential") => ReconnectPolicy::Exponential {
            initial: reconnect_delay,
        },
        Some(other) => {
            return Err(MeridianError::Config(format!(
                "MERIDIAN_RECONNECT_BACKOFF must be fixed or exponential, got {other:?}"
            )));
        }
    };
    let ping_interval = Duration::from_secs(positive(
        &lookup,
        "MERIDIAN_PING_INTERVAL_SECS",
        DEFAULT_PING_INTERVAL_SECS,
    )?);

    let history = HistoryConfig {
        url: lookup("MERIDIAN_HISTORY_URL").unwrap_or_else(|| DEFAULT_HISTORY_URL.to_string()),
        api_token: lookup("MERIDIAN_API_TOKEN"),
        limit: positive(&lookup, "MERIDIAN_HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT)?,
        backfill_limit: positive(&lookup, "MERIDIAN_BACKFILL_LIMIT", DEFAULT_BACKFILL_LIMIT)?,
    };

    let flush_interval = Duration::from_millis(positive(
        &lookup,
        "MERIDIAN_FLUSH_INTERVAL_MS",
        DEFAULT_FLUSH_INTERVAL_MS,
    )?);

    let topics = lookup("MERIDIAN_TOPICS")
        .unwrap_or_else(|| DEFAULT_TOPICS.to_string())
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.parse::<Topic>()
                .map_err(|e| MeridianError::Config(format!("MERIDIAN_TOPICS: {e}")))
        })
        .collect::<crate::Result<Vec<_>>>()?;

    Ok(AppConfig {
        channel: ChannelConfig {
            websocket_url,
            reconnect,
            ping_interval,
        },
        history,
        render: RenderConfig { flush_interval },
        topics,
    })
}

/// Parses a strictly positive number, falling back to `default` when unset.
fn positive<F, T>(lookup: &F, name: &str, default: T) -> crate::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Default,
{
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Ok(value),
        _ => Err(MeridianError::Config(format!(
            "{name} must be a positive integer, got {raw:?}"
        ))),
    }
}

/// Returns the value of an environment variable if it exists and is non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Runs the loader against a fixed set of variables. Empty values are
    /// treated as absent, like [`non_empty_var`].
    fn load(vars: &[(&str, &str)]) -> crate::Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config_from(|name| vars.get(name).filter(|v| !v.is_empty()).cloned())
    }

    #[test]
    fn defaults_without_env_vars() {
        let config = load(&[]).unwrap();

        assert_eq!(config.channel.websocket_url, DEFAULT_WEBSOCKET_URL);
        assert_eq!(
            config.channel.reconnect,
            ReconnectPolicy::Fixed(Duration::from_secs(3))
        );
        assert_eq!(config.history.url, DEFAULT_HISTORY_URL);
        assert!(config.history.api_token.is_none());
        assert_eq!(config.history.limit, 500);
        assert_eq!(config.render.flush_interval, Duration::from_millis(16));
        assert_eq!(config.topics, vec![Topic::new("XAUUSD", "H1")]);
    }

    #[test]
    fn reads_every_override() {
        let config = load(&[
            ("MERIDIAN_WEBSOCKET_URL", "wss://feed.example.com/ws"),
            ("MERIDIAN_RECONNECT_DELAY_MS", "5000"),
            ("MERIDIAN_RECONNECT_BACKOFF", "exponential"),
            ("MERIDIAN_PING_INTERVAL_SECS", "10"),
            ("MERIDIAN_HISTORY_URL", "https://api.example.com/bars"),
            ("MERIDIAN_API_TOKEN", "secret"),
            ("MERIDIAN_HISTORY_LIMIT", "200"),
            ("MERIDIAN_BACKFILL_LIMIT", "5"),
            ("MERIDIAN_FLUSH_INTERVAL_MS", "33"),
            ("MERIDIAN_TOPICS", "XAUUSD:H1, EURUSD:M5"),
        ])
        .unwrap();

        assert_eq!(config.channel.websocket_url, "wss://feed.example.com/ws");
        assert_eq!(
            config.channel.reconnect,
            ReconnectPolicy::Exponential {
                initial: Duration::from_secs(5)
            }
        );
        assert_eq!(config.channel.ping_interval, Duration::from_secs(10));
        assert_eq!(config.history.api_token.as_deref(), Some("secret"));
        assert_eq!(config.history.limit, 200);
        assert_eq!(config.history.backfill_limit, 5);
        assert_eq!(config.render.flush_interval, Duration::from_millis(33));
        assert_eq!(
            config.topics,
            vec![Topic::new("XAUUSD", "H1"), Topic::new("EURUSD", "M5")]
        );
    }

    #[test]
    fn rejects_zero_and_garbage_numbers() {
        let err = load(&[("MERIDIAN_FLUSH_INTERVAL_MS", "0")]).unwrap_err();
        assert!(err.to_string().contains("MERIDIAN_FLUSH_INTERVAL_MS"));

        let err = load(&[("MERIDIAN_HISTORY_LIMIT", "lots")]).unwrap_err();
        assert!(matches!(err, MeridianError::Config(_)));
    }

    #[test]
    fn rejects_unknown_backoff() {
        let err = load(&[("MERIDIAN_RECONNECT_BACKOFF", "random")]).unwrap_err();
        assert!(err.to_string().contains("fixed or exponential"));
    }

    #[test]
    fn rejects_malformed_topics() {
        let err = load(&[("MERIDIAN_TOPICS", "XAUUSD")]).unwrap_err();
        assert!(err.to_string().contains("MERIDIAN_TOPICS"));
    }

    #[test]
    fn empty_values_treated_as_absent() {
        let config = load(&[
            ("MERIDIAN_WEBSOCKET_URL", ""),
            ("MERIDIAN_API_TOKEN", ""),
        ])
        .unwrap();

        assert_eq!(config.channel.websocket_url, DEFAULT_WEBSOCKET_URL);
        assert!(config.history.api_token.is_none());
    }
}
