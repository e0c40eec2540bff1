//! End-to-end provider/store scenarios over the in-memory transport.

use std::sync::Arc;

use courier_core::schema::Schema;
use courier_model_memory::MemoryModel;
use courier_provider::{EventPayload, Listener, Provider, ProviderEvent, ProviderOptions};
use courier_store::{Store, StoreOptions};
use courier_transport_memory::MemoryTransport;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::{timeout, Duration};

fn soft_delete_schema() -> Schema {
    Schema::new(
        "Schema",
        json!({"metadata": {"deleted": "date", "updated": "date"}}),
    )
    .unwrap()
}

fn plain_schema() -> Schema {
    Schema::new("Schema", json!({})).unwrap()
}

async fn open_pair(
    schema: Schema,
    options: ProviderOptions,
) -> (
    Provider<MemoryTransport>,
    Store<MemoryTransport, MemoryModel>,
    MemoryTransport,
) {
    let transport = MemoryTransport::new();
    let store = Store::new(
        schema.clone(),
        transport.clone(),
        &StoreOptions::default(),
        MemoryModel::for_schema,
    )
    .unwrap();
    store.open().await.unwrap();

    let provider = Provider::new(schema, transport.clone(), options).unwrap();
    (provider, store, transport)
}

#[tokio::test]
async fn create_round_trip() {
    let (provider, _store, _transport) =
        open_pair(plain_schema(), ProviderOptions::default()).await;

    let created = provider.create(json!({"a": 1}), None).await.unwrap();

    assert_eq!(created["a"], json!(1));
    assert!(created.get("_id").is_some());
    assert_eq!(provider.count(json!({})).await.unwrap(), 1);
}

#[tokio::test]
async fn create_fans_out_arrays() {
    let (provider, _store, _transport) =
        open_pair(plain_schema(), ProviderOptions::default()).await;

    let created = provider
        .create(json!([{"a": 1}, {"a": 2}]), Some(json!({"a": 1})))
        .await
        .unwrap();

    let items = created.as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(provider.count_all().await.unwrap(), 2);
}

#[tokio::test]
async fn tombstone_delete_round_trip() {
    let (provider, _store, _transport) =
        open_pair(soft_delete_schema(), ProviderOptions::default()).await;

    provider
        .create(json!([{"a": 1}, {"a": 1}, {"a": 2}]), None)
        .await
        .unwrap();
    assert_eq!(provider.count_all().await.unwrap(), 3);

    let deleted = provider.delete(json!({"a": 1}), None).await.unwrap();

    // Post-tombstone snapshots: both documents, with the stamp applied.
    assert_eq!(deleted.len(), 2);
    for doc in &deleted {
        assert!(doc["metadata"]["deleted"].is_number());
        assert!(doc["metadata"]["updated"].is_number());
    }

    // Tombstoned documents are invisible to default-filtered reads.
    assert_eq!(provider.count_all().await.unwrap(), 1);
    let remaining = provider.find_all(None, None).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0]["a"], json!(2));
    assert!(provider.find(json!({"a": 1}), None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_by_id_applies_the_single_element_reducer() {
    let (provider, _store, _transport) =
        open_pair(soft_delete_schema(), ProviderOptions::default()).await;

    let created = provider.create(json!({"a": 1}), None).await.unwrap();
    let id = created["_id"].clone();

    let deleted = provider.delete_by_id(id, None).await.unwrap().unwrap();
    assert!(deleted["metadata"]["deleted"].is_number());

    // Already tombstoned: the follow-up update matches nothing.
    let gone = provider.delete(json!({"a": 1}), None).await.unwrap();
    assert!(gone.iter().all(|doc| doc["metadata"]["deleted"].is_number()));
}

#[tokio::test]
async fn find_by_id_and_update_by_id_round_trip() {
    let (provider, _store, _transport) =
        open_pair(soft_delete_schema(), ProviderOptions::default()).await;

    let created = provider.create(json!({"a": 1}), None).await.unwrap();
    let id = created["_id"].clone();

    let found = provider.find_by_id(id.clone(), None).await.unwrap().unwrap();
    assert_eq!(found["a"], json!(1));

    let updated = provider
        .update_by_id(id.clone(), json!({"$set": {"a": 9}}), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated["a"], json!(9));
    assert!(updated["metadata"]["updated"].is_number());

    assert_eq!(provider.find_by_id(json!(999), None).await.unwrap(), None);
}

#[tokio::test]
async fn find_pages_through_large_result_sets() {
    let options = ProviderOptions {
        batch_size: 2,
        ..ProviderOptions::default()
    };
    let (provider, _store, _transport) = open_pair(plain_schema(), options).await;

    let docs: Vec<Value> = (0..5).map(|i| json!({"i": i})).collect();
    provider.create(Value::Array(docs), None).await.unwrap();

    let found = provider
        .find_all(None, Some(json!({"limit": 5})))
        .await
        .unwrap();

    assert_eq!(found.len(), 5);
    let indexes: Vec<&Value> = found.iter().map(|doc| &doc["i"]).collect();
    assert_eq!(indexes, vec![&json!(0), &json!(1), &json!(2), &json!(3), &json!(4)]);
}

#[tokio::test]
async fn bus_create_traffic_reaches_local_listeners() {
    let (provider, _store, transport) =
        open_pair(plain_schema(), ProviderOptions::default()).await;

    let (sender, mut receiver) = tokio::sync::mpsc::channel(10);
    let listener: Listener = Arc::new(move |payload| {
        let _ = sender.try_send(payload);
    });
    provider.on(ProviderEvent::Create, listener).await.unwrap();

    // A second peer on the same bus issues the create.
    let peer = Provider::new(plain_schema(), transport.clone(), ProviderOptions::default())
        .unwrap();
    peer.create(json!({"a": 1}), None).await.unwrap();

    let payload = timeout(Duration::from_secs(1), receiver.recv())
        .await
        .unwrap()
        .unwrap();
    let EventPayload::Query(query) = payload else {
        panic!("expected a query payload");
    };
    assert_eq!(query["object"], json!({"a": 1}));
}

#[tokio::test]
async fn object_stream_round_trip() {
    let (provider, _store, transport) =
        open_pair(plain_schema(), ProviderOptions::default()).await;

    let mut stream = provider.open_stream();
    // First poll allocates the readable-side subscription.
    assert!(
        timeout(Duration::from_millis(50), stream.next())
            .await
            .is_err()
    );

    // Writes become store-side documents...
    stream.send(json!({"s": 1})).await.unwrap();
    assert_eq!(provider.count(json!({"s": 1})).await.unwrap(), 1);

    // ...and create traffic from peers arrives on the readable side.
    let peer = Provider::new(plain_schema(), transport.clone(), ProviderOptions::default())
        .unwrap();
    peer.create(json!({"p": 2}), None).await.unwrap();

    let mut observed = Vec::new();
    for _ in 0..2 {
        observed.push(
            timeout(Duration::from_secs(1), stream.next())
                .await
                .unwrap()
                .unwrap(),
        );
    }
    assert!(observed.contains(&json!({"s": 1})));
    assert!(observed.contains(&json!({"p": 2})));
}

#[tokio::test]
async fn closed_stores_stop_answering() {
    let options = ProviderOptions {
        timeout_ms: 50,
        ..ProviderOptions::default()
    };
    let (provider, store, _transport) = open_pair(plain_schema(), options).await;

    assert_eq!(provider.count_all().await.unwrap(), 0);

    store.close().await.unwrap();

    let err = provider.count_all().await.unwrap_err();
    assert_eq!(err.to_string(), "query timeout after 50ms");
}
