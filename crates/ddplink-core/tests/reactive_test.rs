#![allow(clippy::unwrap_used)]
// Integration tests for collection views, reactive windows and their
// dependents, fed through `MemoryTransport`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio_stream::StreamExt;
use url::Url;

use ddplink_core::{
    Client, ClientOptions, Document, FetchSettings, MemoryTransport, ReactiveSettings, Sort, Transition,
};

// ── Helpers ─────────────────────────────────────────────────────────

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

async fn connected() -> (Client, MemoryTransport) {
    let transport = MemoryTransport::new();
    let options = ClientOptions::new(Url::parse("ws://localhost:3000/websocket").unwrap());
    let client = Client::builder(options).transport(transport.clone()).build();
    settle().await;
    transport.accept("session-1");
    settle().await;
    transport.take_sent();
    (client, transport)
}

async fn add(transport: &MemoryTransport, id: &str, v: i64) {
    transport.push_server(json!({ "msg": "added", "collection": "items", "id": id, "fields": { "v": v } }));
    settle().await;
}

async fn change(transport: &MemoryTransport, id: &str, v: i64) {
    transport.push_server(json!({ "msg": "changed", "collection": "items", "id": id, "fields": { "v": v } }));
    settle().await;
}

async fn remove(transport: &MemoryTransport, id: &str) {
    transport.push_server(json!({ "msg": "removed", "collection": "items", "id": id }));
    settle().await;
}

fn by_v() -> ReactiveSettings {
    ReactiveSettings::new().sort_by(|a, b| v(a).cmp(&v(b)))
}

fn v(doc: &Document) -> i64 {
    doc["v"].as_i64().unwrap_or_default()
}

fn values(docs: &[Document]) -> Vec<i64> {
    docs.iter().map(v).collect()
}

// ── Collection views ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_fetch_filters_sorts_and_pages() {
    let (client, transport) = connected().await;
    for (id, value) in [("a", 4), ("b", 1), ("c", 3), ("d", 2), ("e", 5)] {
        add(&transport, id, value).await;
    }

    let items = client.collection("items");
    assert_eq!(values(&items.fetch_all()), [4, 1, 3, 2, 5]);

    let odd = items.clone().filter(|doc| v(doc) % 2 == 1);
    assert!(odd.is_filtered());
    assert_eq!(
        values(&odd.fetch(&FetchSettings::new().sort_by(|a, b| v(a).cmp(&v(b))))),
        [1, 3, 5]
    );
    assert_eq!(
        values(&items.fetch(&FetchSettings::new().sort_by(|a, b| v(b).cmp(&v(a))).skip(1).limit(2))),
        [4, 3]
    );
    assert!(!odd.clear_filter().is_filtered());
}

#[tokio::test(start_paused = true)]
async fn test_fetch_returns_independent_copies() {
    let (client, transport) = connected().await;
    add(&transport, "a", 1).await;

    let mut docs = client.collection("items").fetch_all();
    docs.clear();
    assert_eq!(client.collection("items").fetch_all().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_filtered_observe_reports_transitions() {
    let (client, transport) = connected().await;

    let transitions = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&transitions);
    let _listener = client
        .collection("items")
        .filter(|doc| v(doc) > 10)
        .observe(move |change| seen.lock().push(change.transition));

    add(&transport, "1", 5).await;
    change(&transport, "1", 15).await;
    change(&transport, "1", 20).await;
    change(&transport, "1", 3).await;
    remove(&transport, "1").await;

    assert_eq!(
        *transitions.lock(),
        vec![Transition::Entered, Transition::Stayed, Transition::Exited]
    );
}

#[tokio::test(start_paused = true)]
async fn test_raw_listener_sees_every_mutation() {
    let (client, transport) = connected().await;

    let docs = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&docs);
    let listener = client
        .collection("items")
        .on_change(move |change| seen.lock().push(Value::from(change.document().clone())));

    add(&transport, "1", 1).await;
    change(&transport, "1", 2).await;
    listener.stop();
    remove(&transport, "1").await;

    assert_eq!(
        *docs.lock(),
        vec![json!({ "_id": "1", "v": 1 }), json!({ "_id": "1", "v": 2 })]
    );
}

// ── Reactive windows ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_sorted_limited_window() {
    let (client, transport) = connected().await;
    let reactive = client.collection("items").reactive(by_v().limit(2));

    add(&transport, "a", 3).await;
    add(&transport, "b", 1).await;
    add(&transport, "c", 2).await;

    assert_eq!(values(&reactive.data()), [1, 2]);
    assert_eq!(reactive.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_window_refills_after_removal() {
    let (client, transport) = connected().await;
    for (id, value) in [("a", 1), ("b", 2), ("c", 3), ("d", 4)] {
        add(&transport, id, value).await;
    }

    let reactive = client.collection("items").reactive(by_v().skip(1).limit(2));
    assert_eq!(values(&reactive.data()), [2, 3]);

    remove(&transport, "a").await;
    assert_eq!(values(&reactive.data()), [3, 4]);

    remove(&transport, "c").await;
    assert_eq!(values(&reactive.data()), [4]);

    // Moving a document across the window boundary re-sorts it.
    change(&transport, "b", 10).await;
    assert_eq!(values(&reactive.data()), [10]);
    change(&transport, "d", 0).await;
    assert_eq!(values(&reactive.data()), [10]);
    add(&transport, "e", 5).await;
    assert_eq!(values(&reactive.data()), [5, 10]);
}

#[tokio::test(start_paused = true)]
async fn test_window_follows_view_filter() {
    let (client, transport) = connected().await;
    let reactive = client
        .collection("items")
        .filter(|doc| v(doc) >= 10)
        .reactive(by_v());

    add(&transport, "a", 5).await;
    add(&transport, "b", 12).await;
    assert_eq!(values(&reactive.data()), [12]);

    change(&transport, "a", 11).await;
    assert_eq!(values(&reactive.data()), [11, 12]);

    change(&transport, "b", 1).await;
    assert_eq!(values(&reactive.data()), [11]);
}

#[tokio::test(start_paused = true)]
async fn test_settings_change_rebuilds_window() {
    let (client, transport) = connected().await;
    for (id, value) in [("a", 3), ("b", 1), ("c", 2)] {
        add(&transport, id, value).await;
    }

    let reactive = client.collection("items").reactive(ReactiveSettings::new());
    assert_eq!(values(&reactive.data()), [3, 1, 2]);

    let ticks = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&ticks);
    let _ticker = reactive.on_change(move |docs| seen.lock().push(values(docs)));

    reactive
        .sort(Sort::By(Arc::new(|a: &Document, b: &Document| v(a).cmp(&v(b)))))
        .limit(2);
    reactive.skip(1);
    reactive.settings(&ReactiveSettings::new().skip(0).unlimited().sort(Sort::Natural));

    assert_eq!(
        *ticks.lock(),
        vec![vec![1, 2, 3], vec![1, 2], vec![2, 3], vec![3, 1, 2]]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_and_start_resyncs() {
    let (client, transport) = connected().await;
    let reactive = client.collection("items").reactive(by_v());
    add(&transport, "a", 2).await;

    reactive.stop();
    assert!(!reactive.is_started());
    add(&transport, "b", 1).await;
    assert_eq!(values(&reactive.data()), [2]);

    reactive.start();
    assert!(reactive.is_started());
    assert_eq!(values(&reactive.data()), [1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_count_tracks_window_length() {
    let (client, transport) = connected().await;
    let reactive = client.collection("items").reactive(ReactiveSettings::new().limit(2));
    let count = reactive.count();
    let mut stream = reactive.count_stream();
    assert_eq!(stream.next().await, Some(0));

    add(&transport, "a", 1).await;
    add(&transport, "b", 2).await;
    add(&transport, "c", 3).await;
    assert_eq!(*count.borrow(), 2);
    assert_eq!(stream.next().await, Some(2));

    remove(&transport, "a").await;
    remove(&transport, "b").await;
    assert_eq!(*count.borrow(), 1);
    assert!(!reactive.is_empty());
}

// ── Dependents ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_reducer_follows_window() {
    let (client, transport) = connected().await;
    let reactive = client.collection("items").reactive(by_v());
    add(&transport, "a", 1).await;

    let sum = reactive.reduce(|acc, doc, _, _| acc + v(doc), 0);
    assert_eq!(sum.data(), 1);

    let ticks = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&ticks);
    let _ticker = sum.on_change(move |total| seen.lock().push(*total));

    add(&transport, "b", 2).await;
    assert_eq!(sum.data(), 3);

    sum.stop();
    add(&transport, "c", 3).await;
    assert_eq!(sum.data(), 3);

    sum.start();
    assert_eq!(sum.data(), 6);
    assert_eq!(*ticks.lock(), vec![3, 6]);
}

#[tokio::test(start_paused = true)]
async fn test_map_passes_index_and_window() {
    let (client, transport) = connected().await;
    let reactive = client.collection("items").reactive(by_v());
    let labels = reactive.map(|doc, index, window| format!("{}/{}:{}", index + 1, window.len(), v(doc)));

    add(&transport, "a", 20).await;
    add(&transport, "b", 10).await;

    assert_eq!(labels.data(), ["1/2:10", "2/2:20"]);
}

#[tokio::test(start_paused = true)]
async fn test_one_mirrors_window_head() {
    let (client, transport) = connected().await;
    let reactive = client.collection("items").reactive(by_v());
    let kept = reactive.one(true);
    let cleared = reactive.one(false);
    assert!(kept.preserves());
    assert_eq!(kept.data(), None);

    let heads = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&heads);
    let _ticker = cleared.on_change(move |doc| seen.lock().push(doc.map(v)));

    add(&transport, "a", 2).await;
    add(&transport, "b", 3).await;
    add(&transport, "c", 1).await;
    assert_eq!(kept.data().as_ref().map(v), Some(1));

    remove(&transport, "a").await;
    remove(&transport, "b").await;
    remove(&transport, "c").await;

    assert_eq!(kept.data().as_ref().map(v), Some(1));
    assert_eq!(cleared.data(), None);
    // Changes behind the head do not notify.
    assert_eq!(*heads.lock(), vec![Some(2), Some(1), None]);

    kept.settings(false);
    kept.stop();
    kept.start();
    assert_eq!(kept.data(), None);
}

#[tokio::test(start_paused = true)]
async fn test_stop_change_listeners_freezes_reactive_collections() {
    let (client, transport) = connected().await;
    let reactive = client.collection("items").reactive(ReactiveSettings::new());
    add(&transport, "a", 1).await;

    client.stop_change_listeners();
    add(&transport, "b", 2).await;

    assert_eq!(values(&reactive.data()), [1]);
    assert!(!reactive.is_started());
}
