//! Serialization tests for control requests and incoming frame decoding.

use std::collections::BTreeMap;

use meridian::MeridianError;
use meridian::models::{ControlRequest, ServerEvent, Topic};
use meridian::websocket::{decode_ticks, parse_server_event};
use tokio_test::{assert_err, assert_ok};

#[test]
fn test_subscribe_request_serializes() {
    let request = ControlRequest::subscribe(vec![
        Topic::new("XAUUSD", "H1"),
        Topic::new("EURUSD", "M5"),
    ]);

    let json = assert_ok!(serde_json::to_string(&request));
    assert_eq!(
        json,
        r#"{"action":"subscribe","topics":["XAUUSD:H1","EURUSD:M5"]}"#
    );
}

#[test]
fn test_unsubscribe_request_serializes() {
    let request = ControlRequest::unsubscribe(vec![Topic::new("XAUUSD", "H1")]);

    let value = assert_ok!(serde_json::to_value(&request));
    assert_eq!(value["action"], "unsubscribe");
    assert_eq!(value["topics"][0], "XAUUSD:H1");
}

#[test]
fn test_ping_request_omits_topics() {
    let json = assert_ok!(serde_json::to_string(&ControlRequest::ping()));
    assert_eq!(json, r#"{"action":"ping"}"#);
}

#[test]
fn test_unreadable_frames_are_malformed() {
    let err = assert_err!(parse_server_event("not json"));
    assert!(matches!(err, MeridianError::MalformedMessage(_)));

    let err = assert_err!(parse_server_event(r#"{"type":"calculated_values"}"#));
    assert!(matches!(err, MeridianError::MalformedMessage(_)));
}

#[test]
fn test_pong_parses() {
    let event = assert_ok!(parse_server_event(r#"{"type":"pong"}"#));
    assert!(matches!(event, ServerEvent::Pong));
}

#[test]
fn test_one_bad_tick_does_not_spoil_the_batch() {
    let mut data = BTreeMap::new();
    data.insert(
        "XAUUSD".to_string(),
        serde_json::json!({"bid":"1","ask":"2","last":"1.5","high":"2","low":"1","open":"1","timestamp":5}),
    );
    data.insert("EURUSD".to_string(), serde_json::json!({"bid": "oops"}));

    let ticks = decode_ticks(data);
    assert_eq!(ticks.len(), 1);
    assert_eq!(ticks[0].0, "XAUUSD");
}
