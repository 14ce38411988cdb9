mod common;

use std::sync::Arc;
use std::time::Duration;

use cart_session::{DurableStore, Event, LAST_UPDATE_KEY, MemoryStore, Method, StorageChange, TOKEN_KEY};
use serde_json::json;

use common::{
    MockTransport, build_session, build_session_with_events, cart_response, wait_for_event,
};

fn update_signal(value: &str) -> StorageChange {
    StorageChange {
        key: LAST_UPDATE_KEY.to_string(),
        new_value: Some(value.to_string()),
    }
}

#[tokio::test]
async fn test_own_update_signal_does_not_refetch() {
    let transport = MockTransport::new();
    let session = build_session(&transport, Arc::new(MemoryStore::new()));

    transport.push(cart_response(json!({"items": []}), Some("n1"), None));
    session.initialize().await.expect("initialize");
    transport.push(cart_response(json!({"items": []}), Some("n2"), None));
    session.update_item("abc", 1).await.expect("update");
    assert_eq!(transport.calls(), 2);

    let own = session
        .state()
        .last_written_update
        .expect("stamp written")
        .to_string();
    let refetched = session
        .handle_storage_change(&update_signal(&own))
        .await
        .expect("handle change");

    assert!(!refetched);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_foreign_update_signal_refetches_once() {
    let transport = MockTransport::new();
    let session = build_session(&transport, Arc::new(MemoryStore::new()));

    transport.push(cart_response(json!({"items": []}), Some("n1"), None));
    session.initialize().await.expect("initialize");

    transport.push(cart_response(
        json!({"items": [{"key": "abc", "quantity": 4}]}),
        Some("n9"),
        None,
    ));
    let refetched = session
        .handle_storage_change(&update_signal("1700000000000"))
        .await
        .expect("handle change");

    assert!(refetched);
    assert_eq!(transport.calls(), 2);
    assert_eq!(
        transport.last_request().expect("request").method,
        Method::Get
    );
    assert_eq!(session.cart().expect("cart").items_count(), 4);
    assert_eq!(session.nonce().as_deref(), Some("n9"));
}

#[tokio::test]
async fn test_unrelated_keys_and_removals_are_ignored() {
    let transport = MockTransport::new();
    let session = build_session(&transport, Arc::new(MemoryStore::new()));

    let token_change = StorageChange {
        key: TOKEN_KEY.to_string(),
        new_value: Some("tok9".to_string()),
    };
    let removal = StorageChange {
        key: LAST_UPDATE_KEY.to_string(),
        new_value: None,
    };

    assert!(!session.handle_storage_change(&token_change).await.expect("token change"));
    assert!(!session.handle_storage_change(&removal).await.expect("removal"));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_sibling_session_refreshes_after_mutation() {
    let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());

    let transport_a = MockTransport::new();
    let session_a = Arc::new(build_session(&transport_a, Arc::clone(&store)));
    let transport_b = MockTransport::new();
    let (session_b, mut events_b) = build_session_with_events(&transport_b, Arc::clone(&store));
    let session_b = Arc::new(session_b);

    transport_a.push(cart_response(json!({"items": []}), Some("a1"), None));
    session_a.initialize().await.expect("initialize a");
    transport_b.push(cart_response(json!({"items": []}), Some("b1"), None));
    session_b.initialize().await.expect("initialize b");

    let _sync_a = session_a.spawn_sync();
    let _sync_b = session_b.spawn_sync();

    // B's refetch after A's mutation
    transport_b.push(cart_response(
        json!({"items": [{"key": "abc", "quantity": 1}]}),
        Some("b2"),
        None,
    ));
    transport_a.push(cart_response(
        json!({"items": [{"key": "abc", "quantity": 1}]}),
        Some("a2"),
        Some("tok1"),
    ));
    session_a.add_item(12, 1, vec![]).await.expect("add item on a");

    assert!(wait_for_event(&mut events_b, &Event::SyncRefreshed).await);
    assert_eq!(transport_b.calls(), 2);
    assert_eq!(session_b.cart().expect("cart b").items_count(), 1);
    assert_eq!(session_b.nonce().as_deref(), Some("b2"));

    // B picked up the token A persisted
    let refetch = transport_b.last_request().expect("refetch request");
    assert_eq!(refetch.header_value("Cart-Token"), Some("tok1"));

    // A ignored its own signal
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport_a.calls(), 2);
}

#[tokio::test]
async fn test_dispose_stops_sync() {
    let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
    let transport = MockTransport::new();
    let session = Arc::new(build_session(&transport, Arc::clone(&store)));

    let handle = session.spawn_sync();
    assert!(handle.is_running());

    session.dispose();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!handle.is_running());

    store
        .set(LAST_UPDATE_KEY, "1700000000000")
        .await
        .expect("foreign write");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_foreign_write_through_store_triggers_refresh() {
    let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
    let transport = MockTransport::new();
    let (session, mut events) = build_session_with_events(&transport, Arc::clone(&store));
    let session = Arc::new(session);
    let _sync = session.spawn_sync();

    transport.push(cart_response(json!({"items": []}), Some("n1"), None));
    store
        .set(LAST_UPDATE_KEY, "1700000000000")
        .await
        .expect("foreign write");

    assert!(wait_for_event(&mut events, &Event::SyncRefreshed).await);
    assert_eq!(transport.calls(), 1);
    assert_eq!(session.nonce().as_deref(), Some("n1"));
}
