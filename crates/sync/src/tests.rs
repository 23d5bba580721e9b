//! End-to-end scenarios against a real `DocumentStore` (§8): subscribe,
//! mutate, observe a push; disconnect, mutate, reconnect, observe replay.
use std::sync::{
    Arc,
    Mutex,
};

use common::sync_types::SessionId;
use database::DocumentStore;
use value::{
    ConvexObject,
    ConvexValue,
    TableName,
};

use crate::{
    protocol::ServerFrame,
    PushTransport,
    SubscriptionHub,
};

#[derive(Default)]
struct RecordingTransport {
    frames: Mutex<Vec<ServerFrame>>,
    fail_next: Mutex<bool>,
}

impl PushTransport for RecordingTransport {
    fn try_send(&self, frame: ServerFrame) -> Result<(), ServerFrame> {
        let mut fail_next = self.fail_next.lock().unwrap();
        if *fail_next {
            *fail_next = false;
            return Err(frame);
        }
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }
}

fn doc(title: &str) -> ConvexObject {
    let mut fields = std::collections::BTreeMap::new();
    fields.insert("title".parse().unwrap(), ConvexValue::from(title));
    ConvexObject::try_from(fields).unwrap()
}

fn messages_table() -> TableName {
    "messages".parse().unwrap()
}

#[test]
fn subscribe_then_mutate_pushes_an_update() {
    let store = Arc::new(DocumentStore::open_in_memory().unwrap());
    let hub = SubscriptionHub::new(store.clone());
    let session = SessionId::new();
    let transport = Arc::new(RecordingTransport::default());
    hub.connect(session, transport.clone());

    let initial = hub
        .subscribe(session, "messages:list".to_string(), serde_json::json!({}))
        .unwrap();
    assert_eq!(initial.data.as_array().unwrap().len(), 0);
    assert_eq!(initial.seq, 1);

    let id = store.insert(&messages_table(), doc("hello")).unwrap();
    hub.on_write(&database::CommitEvent {
        table: messages_table(),
        changed_ids: vec![id],
    });

    let frames = transport.frames.lock().unwrap();
    assert_eq!(frames.len(), 1);
    match &frames[0] {
        ServerFrame::Update { data, seq, .. } => {
            assert_eq!(*seq, 2);
            assert_eq!(data.as_array().unwrap().len(), 1);
        },
        other => panic!("expected Update, got {other:?}"),
    }
}

#[test]
fn unchanged_result_does_not_push() {
    let store = Arc::new(DocumentStore::open_in_memory().unwrap());
    let hub = SubscriptionHub::new(store.clone());
    let session = SessionId::new();
    let transport = Arc::new(RecordingTransport::default());
    hub.connect(session, transport.clone());

    hub.subscribe(session, "messages:list".to_string(), serde_json::json!({})).unwrap();

    // A commit to an unrelated table must not trigger re-execution.
    let other_table: TableName = "users".parse().unwrap();
    let id = store.insert(&other_table, doc("irrelevant")).unwrap();
    hub.on_write(&database::CommitEvent {
        table: other_table,
        changed_ids: vec![id],
    });

    assert!(transport.frames.lock().unwrap().is_empty());
}

#[test]
fn repeated_subscribe_dedupes_and_is_idempotent() {
    let store = Arc::new(DocumentStore::open_in_memory().unwrap());
    let hub = SubscriptionHub::new(store.clone());
    let session = SessionId::new();

    let first = hub
        .subscribe(session, "messages:list".to_string(), serde_json::json!({}))
        .unwrap();
    let second = hub
        .subscribe(session, "messages:list".to_string(), serde_json::json!({}))
        .unwrap();
    assert_eq!(first.subscription_id, second.subscription_id);
    assert_eq!(hub.subscription_count(), 1);
}

#[test]
fn unsubscribe_is_idempotent() {
    let store = Arc::new(DocumentStore::open_in_memory().unwrap());
    let hub = SubscriptionHub::new(store.clone());
    let session = SessionId::new();
    let sub = hub
        .subscribe(session, "messages:list".to_string(), serde_json::json!({}))
        .unwrap();

    hub.unsubscribe(sub.subscription_id).unwrap();
    assert_eq!(hub.subscription_count(), 0);
    // A second call on an already-removed id must not error.
    hub.unsubscribe(sub.subscription_id).unwrap();
    assert_eq!(hub.subscription_count(), 0);
}

#[test]
fn disconnect_suppresses_pushes_until_reconnect_replays() {
    let store = Arc::new(DocumentStore::open_in_memory().unwrap());
    let hub = SubscriptionHub::new(store.clone());
    let session = SessionId::new();
    let transport = Arc::new(RecordingTransport::default());
    hub.connect(session, transport.clone());
    hub.subscribe(session, "messages:list".to_string(), serde_json::json!({})).unwrap();

    hub.disconnect(session);
    let id = store.insert(&messages_table(), doc("while disconnected")).unwrap();
    hub.on_write(&database::CommitEvent {
        table: messages_table(),
        changed_ids: vec![id],
    });
    assert!(transport.frames.lock().unwrap().is_empty(), "no push while disconnected");

    let new_transport = Arc::new(RecordingTransport::default());
    let replay = hub.connect(session, new_transport.clone());
    assert_eq!(replay.len(), 1);
    assert_eq!(replay[0].seq, 1);
    assert_eq!(replay[0].data.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn invalidation_listener_drives_pushes_from_commits() {
    let store = Arc::new(DocumentStore::open_in_memory().unwrap());
    let hub = SubscriptionHub::new(store.clone());
    let session = SessionId::new();
    let transport = Arc::new(RecordingTransport::default());
    hub.connect(session, transport.clone());
    hub.subscribe(session, "messages:list".to_string(), serde_json::json!({})).unwrap();

    let receiver = store.subscribe_commits();
    let _listener = hub.spawn_invalidation_listener(receiver);

    store.insert(&messages_table(), doc("async hello")).unwrap();

    // Give the background task a chance to drain the commit.
    for _ in 0..50 {
        if !transport.frames.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(transport.frames.lock().unwrap().len(), 1);
}
