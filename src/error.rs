//! Crate-level error types.
//!
//! [`MeridianError`] unifies every error source (configuration, WebSocket,
//! HTTP, JSON) behind a single enum so callers can match on the variant they
//! care about while still using the `?` operator for easy propagation.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MeridianError>;

/// Top-level error type returned by all public APIs.
#[derive(Debug, thiserror::Error)]
pub enum MeridianError {
    /// A configuration value was missing or could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A WebSocket operation (connect, send, receive) failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An HTTP request to the historical query service failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A push-channel message did not match any known shape.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The historical query service answered with `success: false`.
    #[error("historical query failed: {0}")]
    History(String),

    /// The engine task has stopped and no longer accepts commands.
    #[error("engine is no longer running")]
    EngineClosed,
}
