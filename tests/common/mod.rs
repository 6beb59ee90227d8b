//! Shared test utilities: a local push-channel server and canned history.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use meridian::history::HistorySource;
use meridian::models::{Bar, HistoryPage, HistoryRequest, Topic};
use rust_decimal::Decimal;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tungstenite::Message;

/// Upper bound on any single wait in these tests.
pub const TIMEOUT: Duration = Duration::from_secs(5);

pub type ServerSocket = WebSocketStream<TcpStream>;

/// Binds a push-channel server on an ephemeral local port.
pub async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let addr = listener.local_addr().expect("listener has no address");
    (listener, format!("ws://{addr}/ws"))
}

/// Accepts the next client connection and completes the handshake.
pub async fn accept(listener: &TcpListener) -> ServerSocket {
    let (stream, _) = tokio::time::timeout(TIMEOUT, listener.accept())
        .await
        .expect("timed out waiting for a client")
        .expect("accept failed");
    tokio_tungstenite::accept_async(stream)
        .await
        .expect("handshake failed")
}

/// Reads the next text frame as JSON.
pub async fn next_json(ws: &mut ServerSocket) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client went away")
            .expect("read failed");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("client sent invalid JSON");
        }
    }
}

/// Reads frames until a control request with `action` arrives.
pub async fn expect_action(ws: &mut ServerSocket, action: &str) -> serde_json::Value {
    loop {
        let value = next_json(ws).await;
        if value["action"] == action {
            return value;
        }
    }
}

/// Sends one text frame.
pub async fn push(ws: &mut ServerSocket, json: &str) {
    ws.send(Message::Text(json.into()))
        .await
        .expect("failed to push frame");
}

pub fn xau() -> Topic {
    Topic::new("XAUUSD", "H1")
}

pub fn bar(timestamp: &str, close: i64) -> Bar {
    Bar {
        instrument: None,
        granularity: None,
        timestamp: timestamp.into(),
        open: Decimal::from(close),
        high: Decimal::from(close),
        low: Decimal::from(close),
        close: Decimal::from(close),
        forming: false,
        indicators: Default::default(),
    }
}

/// Answers every query with the same bars, optionally slowly per topic.
#[derive(Clone, Default)]
pub struct CannedHistory {
    bars: Arc<HashMap<Topic, Vec<Bar>>>,
    delays: Arc<HashMap<Topic, Duration>>,
}

impl CannedHistory {
    pub fn new(bars: Vec<(Topic, Vec<Bar>)>) -> Self {
        Self {
            bars: Arc::new(bars.into_iter().collect()),
            delays: Arc::default(),
        }
    }

    pub fn with_delay(mut self, topic: Topic, delay: Duration) -> Self {
        let mut delays = (*self.delays).clone();
        delays.insert(topic, delay);
        self.delays = Arc::new(delays);
        self
    }
}

impl HistorySource for CannedHistory {
    async fn fetch(&self, request: HistoryRequest) -> meridian::Result<HistoryPage> {
        if let Some(delay) = self.delays.get(&request.topic) {
            tokio::time::sleep(*delay).await;
        }
        let data = self.bars.get(&request.topic).cloned().unwrap_or_default();
        Ok(HistoryPage {
            success: true,
            total: data.len() as u64,
            offset: 0,
            limit: u64::from(request.limit),
            data,
            error: None,
        })
    }
}
