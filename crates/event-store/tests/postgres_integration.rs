//! PostgreSQL integration tests.
//!
//! These tests run serially against a single shared PostgreSQL container,
//! removed when the test process exits.
//!
//! Run with:
//!
//! ```bash
//! cargo test -p event-store --test postgres_integration
//! ```

use event_store::{
    AggregateId, EventEnvelope, EventStore, EventStoreError, PostgresEventStore, Snapshot, Version,
};
use futures_util::StreamExt;
use serial_test::serial;
use sqlx::PgPool;
use std::sync::{Arc, OnceLock};
use testcontainers::{ContainerAsync, ImageExt, core::IntoContainerPort, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Container and connection string, initialized once for the whole run.
struct TestContainer {
    #[allow(dead_code)] // keeps the container alive
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static TEST_CONTAINER: OnceCell<Arc<TestContainer>> = OnceCell::const_new();
static CONTAINER_ID: OnceLock<String> = OnceLock::new();

/// Removes the container when the test process exits.
#[ctor::dtor]
fn cleanup_container() {
    if let Some(container_id) = CONTAINER_ID.get() {
        let _ = std::process::Command::new("docker")
            .args(["rm", "-f", container_id])
            .output();
    }
}

async fn get_container() -> Arc<TestContainer> {
    TEST_CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default()
                .with_tag("16-alpine")
                .start()
                .await
                .expect("failed to start PostgreSQL container");

            let _ = CONTAINER_ID.set(container.id().to_string());

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432.tcp()).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{host}:{port}/postgres");

            let pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresEventStore::new(pool.clone())
                .run_migrations()
                .await
                .unwrap();
            pool.close().await;

            Arc::new(TestContainer {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Fresh store with truncated tables for test isolation.
async fn get_test_store() -> PostgresEventStore {
    let container = get_container().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(std::time::Duration::from_secs(10))
        .connect(&container.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE events, snapshots, orders, order_items, order_status_history")
        .execute(&pool)
        .await
        .unwrap();

    PostgresEventStore::new(pool)
}

fn envelope(aggregate_id: AggregateId, version: i64, event_type: &str) -> EventEnvelope {
    EventEnvelope::record(
        aggregate_id,
        Version::new(version),
        event_type,
        &serde_json::json!({"v": version}),
    )
    .unwrap()
}

#[tokio::test]
#[serial]
async fn append_and_load_events() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    let last = store
        .append(vec![envelope(aggregate_id, 0, "Created")], Version::none())
        .await
        .unwrap();
    assert_eq!(last, Version::first());

    let events = store.load_events(aggregate_id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "Created");
    assert_eq!(events[0].version, Version::first());
}

#[tokio::test]
#[serial]
async fn append_batch_is_atomic_and_ordered() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    let events = vec![
        envelope(aggregate_id, 0, "Created"),
        envelope(aggregate_id, 1, "Paid"),
        envelope(aggregate_id, 2, "Shipped"),
    ];
    let last = store.append(events, Version::none()).await.unwrap();
    assert_eq!(last, Version::new(2));

    let stored = store.load_events(aggregate_id).await.unwrap();
    let versions: Vec<_> = stored.iter().map(|e| e.version.as_i64()).collect();
    assert_eq!(versions, [0, 1, 2]);
}

#[tokio::test]
#[serial]
async fn stale_expected_version_is_a_conflict() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    store
        .append(vec![envelope(aggregate_id, 0, "Created")], Version::none())
        .await
        .unwrap();

    let err = store
        .append(vec![envelope(aggregate_id, 0, "Created")], Version::none())
        .await
        .unwrap_err();
    assert!(matches!(err, EventStoreError::ConcurrencyConflict { .. }));
}

#[tokio::test]
#[serial]
async fn matching_expected_version_appends() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    store
        .append(vec![envelope(aggregate_id, 0, "Created")], Version::none())
        .await
        .unwrap();
    let last = store
        .append(vec![envelope(aggregate_id, 1, "Paid")], Version::first())
        .await
        .unwrap();
    assert_eq!(last, Version::new(1));
}

#[tokio::test]
#[serial]
async fn unique_constraint_maps_to_conflict() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    store
        .append(vec![envelope(aggregate_id, 0, "Created")], Version::none())
        .await
        .unwrap();

    // Two racing appends with the same predicate: exactly one wins.
    let (a, b) = tokio::join!(
        store.append(vec![envelope(aggregate_id, 1, "Paid")], Version::first()),
        store.append(vec![envelope(aggregate_id, 1, "Paid")], Version::first()),
    );
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);

    let events = store.load_events(aggregate_id).await.unwrap();
    assert_eq!(events.len(), 2);
}

#[tokio::test]
#[serial]
async fn load_events_from_version_tail() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    store
        .append(
            vec![
                envelope(aggregate_id, 0, "Created"),
                envelope(aggregate_id, 1, "Paid"),
                envelope(aggregate_id, 2, "Shipped"),
            ],
            Version::none(),
        )
        .await
        .unwrap();

    let tail = store
        .load_events_from(aggregate_id, Version::new(1))
        .await
        .unwrap();
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].version, Version::new(1));
}

#[tokio::test]
#[serial]
async fn last_event_tracks_the_head() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    assert!(store.last_event(aggregate_id).await.unwrap().is_none());

    store
        .append(
            vec![
                envelope(aggregate_id, 0, "Created"),
                envelope(aggregate_id, 1, "Paid"),
            ],
            Version::none(),
        )
        .await
        .unwrap();

    let last = store.last_event(aggregate_id).await.unwrap().unwrap();
    assert_eq!(last.version, Version::new(1));
    assert_eq!(last.event_type, "Paid");
}

#[tokio::test]
#[serial]
async fn snapshot_upsert_and_load() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    store
        .save_snapshot(
            Snapshot::from_state(aggregate_id, Version::new(2), &serde_json::json!({"n": 1}))
                .unwrap(),
        )
        .await
        .unwrap();
    store
        .save_snapshot(
            Snapshot::from_state(aggregate_id, Version::new(4), &serde_json::json!({"n": 2}))
                .unwrap(),
        )
        .await
        .unwrap();

    let snapshot = store.load_snapshot(aggregate_id).await.unwrap().unwrap();
    assert_eq!(snapshot.version, Version::new(4));
    assert!(snapshot.is_current_schema());
    assert_eq!(snapshot.state["n"], 2);
}

#[tokio::test]
#[serial]
async fn stream_all_pages_through_the_log() {
    let store = get_test_store().await;

    let a = AggregateId::new();
    let b = AggregateId::new();
    store
        .append(vec![envelope(a, 0, "Created")], Version::none())
        .await
        .unwrap();
    store
        .append(vec![envelope(b, 0, "Created")], Version::none())
        .await
        .unwrap();
    store
        .append(vec![envelope(a, 1, "Paid")], Version::first())
        .await
        .unwrap();

    let stream = store.stream_all().await.unwrap();
    let events: Vec<_> = stream.map(|e| e.unwrap()).collect().await;
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].aggregate_id, a);
    assert_eq!(events[2].version, Version::new(1));
}
