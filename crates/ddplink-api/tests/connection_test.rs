#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use ddplink_api::{
    ClientMessage, Connection, ConnectionOptions, ConnectionState, Emission, Event, EventKind,
    JsonCodec, MemoryTransport,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc;
use url::Url;

fn connection(clean_queue: bool) -> (Connection, mpsc::UnboundedReceiver<Emission>, MemoryTransport) {
    let transport = MemoryTransport::new();
    let mut options = ConnectionOptions::new(Url::parse("ws://localhost:3000/websocket").unwrap());
    options.clean_queue = clean_queue;
    let (conn, rx) = Connection::new(options, Arc::new(transport.clone()), Arc::new(JsonCodec));
    (conn, rx, transport)
}

fn method(id: &str) -> ClientMessage {
    ClientMessage::Method {
        id: id.into(),
        method: "noop".into(),
        params: vec![],
    }
}

#[tokio::test(start_paused = true)]
async fn reconnect_resumes_session_and_replays_queue_in_order() {
    let (conn, mut rx, transport) = connection(false);
    conn.connect();
    transport.accept("session-1");
    assert_eq!(rx.recv().await.unwrap().event.kind(), EventKind::Connected);
    transport.take_sent();

    transport.drop_connection();
    assert_eq!(*rx.recv().await.unwrap().event, Event::Disconnected);
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    conn.enqueue(method("a"), false);
    conn.enqueue(method("b"), false);
    conn.enqueue(method("urgent"), true);
    assert_eq!(conn.queue_len(), 3);

    // Reconnect fires after the default 10s interval.
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(transport.open_count(), 2);

    let handshake = transport.take_sent();
    assert_eq!(
        handshake,
        vec![json!({ "msg": "connect", "version": "1", "support": ["1"], "session": "session-1" })]
    );

    transport.accept("session-1");
    rx.recv().await.unwrap();

    let ids: Vec<_> = transport
        .take_sent()
        .iter()
        .map(|m| m["id"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(ids, vec!["urgent", "a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn clean_queue_discards_pending_requests_on_close() {
    let (conn, mut rx, transport) = connection(true);
    conn.connect();
    transport.accept("s");
    rx.recv().await.unwrap();

    conn.pause_queue();
    conn.enqueue(method("lost"), false);
    assert_eq!(conn.queue_len(), 1);

    transport.drop_connection();
    rx.recv().await.unwrap();
    assert_eq!(conn.queue_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn close_before_connected_emits_nothing_but_retries() {
    let (conn, mut rx, transport) = connection(false);
    conn.connect();
    tokio::task::yield_now().await;

    transport.drop_connection();
    tokio::time::sleep(Duration::from_secs(11)).await;

    assert!(rx.try_recv().is_err());
    assert_eq!(transport.open_count(), 2);
    assert_eq!(conn.state(), ConnectionState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn paused_queue_flushes_on_continue() {
    let (conn, mut rx, transport) = connection(false);
    conn.connect();
    transport.accept("s");
    rx.recv().await.unwrap();
    transport.take_sent();

    conn.pause_queue();
    conn.enqueue(method("held"), false);
    assert!(transport.take_sent().is_empty());

    conn.continue_queue();
    assert_eq!(transport.take_sent()[0]["id"], "held");
}

#[tokio::test]
async fn undecodable_frames_are_dropped() {
    let (conn, mut rx, transport) = connection(false);
    conn.connect();
    transport.push_frame("not json".into());
    transport.push_server(json!({ "msg": "mystery" }));
    transport.accept("s");

    assert_eq!(rx.recv().await.unwrap().event.kind(), EventKind::Connected);
}
