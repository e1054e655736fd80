// End-to-end scheduler scenarios against the in-memory store: claim order,
// fan-out, status flushing, lease expiry, and the retry cap.

mod common;

use chrono::Utc;
use common::{pending_row, MemoryStore};
use pulse_config::SchedulerConfig;
use pulse_server::model::{NotificationStatus, Priority};
use pulse_server::registry::SinkRegistry;
use pulse_server::scheduler::Scheduler;
use pulse_server::store::NotificationStore;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        claim_workers: 2,
        delivery_workers: 4,
        batch_size: 50,
        poll_interval_ms: 10,
        lease_duration_secs: 30,
        hand_off_capacity: 100,
        status_flush_interval_ms: 20,
        sweep_interval_secs: 1,
        metrics_interval_secs: 60,
        max_retries: 3,
    }
}

async fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn delivers_pending_rows_to_connected_sink() {
    let store = Arc::new(MemoryStore::new(3));
    let registry = Arc::new(SinkRegistry::new(100, Duration::from_secs(300)));
    let (_sink, mut rx) = registry.register("user_u1").unwrap();

    let rows: Vec<_> = (0..10)
        .map(|i| {
            pending_row(
                "user_u1",
                "job.new",
                Utc::now() + chrono::Duration::milliseconds(i),
            )
        })
        .collect();
    let ids: HashSet<Uuid> = rows.iter().map(|r| r.id).collect();
    store.seed(rows);

    let cancel = CancellationToken::new();
    let scheduler = Scheduler::new(
        store.clone() as Arc<dyn NotificationStore>,
        registry.clone(),
        fast_config(),
        "replica-test".to_string(),
    );
    let handle = tokio::spawn(scheduler.run(cancel.clone()));

    let mut frames = Vec::new();
    while frames.len() < 10 {
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("frame within 2s")
            .expect("sink still open");
        frames.push(frame);
    }

    for frame in &frames {
        let value: serde_json::Value = serde_json::from_str(frame).unwrap();
        assert_eq!(value["event_type"], "job.new");
        assert_eq!(value["priority"], "HIGH");
        assert_eq!(value["payload"]["k"], "v");
        assert!(ids.contains(&value["id"].as_str().unwrap().parse::<Uuid>().unwrap()));
    }

    cancel.cancel();
    handle.await.unwrap();

    // The final drain flushed every outcome before the scheduler exited.
    assert_eq!(store.count_with_status(NotificationStatus::Pushed), 10);
    for id in ids {
        let row = store.get(id).unwrap();
        assert!(row.delivered_ts.is_some());
        assert!(row.owner_id.is_none());
    }
}

#[tokio::test]
async fn no_live_sink_marks_rows_failed() {
    let store = Arc::new(MemoryStore::new(3));
    let registry = Arc::new(SinkRegistry::new(100, Duration::from_secs(300)));

    let rows: Vec<_> = (0..3)
        .map(|i| {
            pending_row(
                "nobody",
                "connection.request",
                Utc::now() + chrono::Duration::milliseconds(i),
            )
        })
        .collect();
    store.seed(rows);

    let cancel = CancellationToken::new();
    let scheduler = Scheduler::new(
        store.clone() as Arc<dyn NotificationStore>,
        registry,
        fast_config(),
        "replica-test".to_string(),
    );
    let handle = tokio::spawn(scheduler.run(cancel.clone()));

    let store_check = store.clone();
    assert!(
        wait_until(Duration::from_secs(2), move || {
            store_check.count_with_status(NotificationStatus::Failed) == 3
        })
        .await,
        "rows should fail without a live sink"
    );

    cancel.cancel();
    handle.await.unwrap();

    for row in store.all() {
        assert_eq!(row.status, NotificationStatus::Failed);
        assert!(row
            .last_error
            .as_deref()
            .unwrap()
            .contains("no active connections"));
    }
}

#[tokio::test]
async fn shutdown_flushes_buffered_outcomes() {
    let store = Arc::new(MemoryStore::new(3));
    let registry = Arc::new(SinkRegistry::new(100, Duration::from_secs(300)));
    let (_sink, mut rx) = registry.register("u1").unwrap();

    let rows: Vec<_> = (0..5)
        .map(|i| pending_row("u1", "job.new", Utc::now() + chrono::Duration::milliseconds(i)))
        .collect();
    store.seed(rows);

    // A flush interval far longer than the test: only the post-cancellation
    // drain can apply the outcomes.
    let config = SchedulerConfig {
        status_flush_interval_ms: 60_000,
        ..fast_config()
    };

    let cancel = CancellationToken::new();
    let scheduler = Scheduler::new(
        store.clone() as Arc<dyn NotificationStore>,
        registry.clone(),
        config,
        "replica-test".to_string(),
    );
    let handle = tokio::spawn(scheduler.run(cancel.clone()));

    for _ in 0..5 {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("frame within 2s")
            .expect("sink still open");
    }

    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(store.count_with_status(NotificationStatus::Pushed), 5);
    assert_eq!(store.count_with_status(NotificationStatus::Claimed), 0);
}

#[tokio::test]
async fn claim_prefers_high_priority_then_fifo() {
    let store = MemoryStore::new(3);
    let base = Utc::now();

    let mut rows = Vec::new();
    for i in 0..100 {
        rows.push(pending_row(
            "u1",
            "follower.new",
            base + chrono::Duration::microseconds(i),
        ));
    }
    // The HIGH row arrives last but must be claimed first.
    let high = pending_row("u1", "job.new", base + chrono::Duration::milliseconds(1));
    let high_id = high.id;
    rows.push(high);
    store.seed(rows);

    let claimed = store
        .claim_batch("owner-a", Duration::from_secs(30), 10)
        .await
        .unwrap();

    assert_eq!(claimed.len(), 10);
    assert_eq!(claimed[0].id, high_id);
    assert_eq!(claimed[0].priority, Priority::High);
    assert!(claimed[1..].iter().all(|c| c.priority == Priority::Low));
    // The LOW tail is FIFO by creation time.
    for pair in claimed[1..].windows(2) {
        assert!(pair[0].received_ts <= pair[1].received_ts);
    }
}

#[tokio::test]
async fn expired_leases_return_to_pending_once() {
    let store = MemoryStore::new(3);
    let rows: Vec<_> = (0..5)
        .map(|i| pending_row("u1", "job.new", Utc::now() + chrono::Duration::milliseconds(i)))
        .collect();
    store.seed(rows);

    let claimed = store
        .claim_batch("replica-a", Duration::from_millis(10), 10)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 5);

    tokio::time::sleep(Duration::from_millis(50)).await;

    let outcome = store.reclaim_expired().await.unwrap();
    assert_eq!(outcome.reverted, 5);
    assert_eq!(outcome.exhausted, 0);

    // Idempotent: nothing left to reclaim.
    let again = store.reclaim_expired().await.unwrap();
    assert_eq!(again.total(), 0);

    for row in store.all() {
        assert_eq!(row.status, NotificationStatus::Pending);
        assert_eq!(row.retry_count, 1);
        assert!(row.owner_id.is_none());
        assert!(row.lease_deadline.is_none());
    }

    // Another replica can claim the reverted rows.
    let reclaimed = store
        .claim_batch("replica-b", Duration::from_secs(30), 10)
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 5);
}

#[tokio::test]
async fn retry_cap_terminates_the_row() {
    let store = MemoryStore::new(3);
    let row = pending_row("u1", "job.new", Utc::now());
    let id = row.id;
    store.seed(vec![row]);

    for expected_retry in 1..=3 {
        let claimed = store
            .claim_batch("replica-a", Duration::from_millis(5), 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);

        tokio::time::sleep(Duration::from_millis(25)).await;
        let outcome = store.reclaim_expired().await.unwrap();
        assert_eq!(outcome.reverted, 1);
        assert_eq!(store.get(id).unwrap().retry_count, expected_retry);
    }

    // Fourth expiry hits the cap: terminal failure, no further claims.
    let claimed = store
        .claim_batch("replica-a", Duration::from_millis(5), 10)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);

    tokio::time::sleep(Duration::from_millis(25)).await;
    let outcome = store.reclaim_expired().await.unwrap();
    assert_eq!(outcome.exhausted, 1);

    let row = store.get(id).unwrap();
    assert_eq!(row.status, NotificationStatus::Failed);
    assert_eq!(row.last_error.as_deref(), Some("retry cap"));
    assert_eq!(row.retry_count, 3);

    assert!(store
        .claim_batch("replica-a", Duration::from_secs(30), 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn batch_operations_handle_boundary_input() {
    let store = MemoryStore::new(3);

    // Empty input is a no-op everywhere.
    assert_eq!(store.insert_batch(&[]).await.unwrap(), 0);
    store.update_status_batch(&[]).await.unwrap();
    assert!(store
        .claim_batch("o", Duration::from_secs(30), 0)
        .await
        .unwrap()
        .is_empty());

    // Oversized claim returns exactly the pending count.
    let rows: Vec<_> = (0..3)
        .map(|i| pending_row("u1", "job.new", Utc::now() + chrono::Duration::milliseconds(i)))
        .collect();
    store.seed(rows);
    let claimed = store
        .claim_batch("o", Duration::from_secs(30), 100)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 3);
    assert!(store
        .claim_batch("o", Duration::from_secs(30), 100)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn duplicate_ids_are_skipped_at_insert() {
    let store = MemoryStore::new(3);
    let row = pending_row("u1", "job.new", Utc::now());

    assert_eq!(store.insert_batch(&[row.clone()]).await.unwrap(), 1);
    assert_eq!(store.insert_batch(&[row.clone()]).await.unwrap(), 0);
    assert_eq!(store.all().len(), 1);
}
