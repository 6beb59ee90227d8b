//! Async WebSocket client for the market data push channel.
//!
//! This module is organized by concern:
//! - [`connection`] - Socket lifecycle, reconnection and replay
//! - [`pool`] - Shared, reference-counted connections keyed by URL
//! - [`subscription`] - Subscribe/unsubscribe control messages
//! - [`handler`] - Incoming message decoding

pub mod connection;
pub mod handler;
pub mod pool;
mod subscription;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use tungstenite::Message;

use crate::Result;
use crate::models::ControlRequest;

pub use connection::{
    ChannelConnection, ChannelEvent, ChannelSettings, ConnectionState, ReconnectPolicy,
};
pub use handler::{decode_ticks, parse_server_event};
pub use pool::ChannelPool;
pub use subscription::{subscribe, unsubscribe};

/// Write half of a push-channel connection.
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Read half of a push-channel connection.
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Establishes a WebSocket connection to the given URL.
///
/// # Errors
///
/// Returns a [`MeridianError`](crate::MeridianError) if the connection or TLS handshake fails.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    let (ws_stream, _) = connect_async(url).await?;
    info!(url, "WebSocket handshake completed");

    Ok(ws_stream.split())
}

/// Sends a keep-alive ping control message.
///
/// # Errors
///
/// Returns a [`MeridianError`](crate::MeridianError) if sending the message fails.
pub async fn ping(write: &mut WsWriter) -> Result<()> {
    send_control(write, &ControlRequest::ping()).await?;
    debug!("Sent ping");

    Ok(())
}

/// Serializes and sends any control message.
///
/// # Errors
///
/// Returns a [`MeridianError`](crate::MeridianError) if serialization or sending fails.
pub async fn send_control(write: &mut WsWriter, request: &ControlRequest) -> Result<()> {
    let json = serde_json::to_string(request)?;
    write.send(Message::Text(json.into())).await?;

    Ok(())
}
