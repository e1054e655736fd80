// ============================================================================
// Ingestor - log bus to durable store
// ============================================================================
//
// Reads notification events from Kafka, buffers them into bounded batches,
// and commits each batch to the store as `pending` rows. Offsets advance
// only after the store accepted the batch; back-pressure on the store
// naturally stalls consumption.
//
// ============================================================================

use anyhow::Result;
use chrono::Utc;
use pulse_config::KafkaConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::kafka::EventConsumer;
use crate::model::{BusEvent, Notification};
use crate::store::NotificationStore;

/// Accumulates rows until the batch is full or the flush deadline (measured
/// from the first buffered row) passes.
struct IngestBatch {
    rows: Vec<Notification>,
    capacity: usize,
    timeout: Duration,
    deadline: Option<Instant>,
}

impl IngestBatch {
    fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
            capacity,
            timeout,
            deadline: None,
        }
    }

    /// Buffer one row; returns true when the batch reached capacity.
    fn push(&mut self, row: Notification, now: Instant) -> bool {
        if self.rows.is_empty() {
            self.deadline = Some(now + self.timeout);
        }
        self.rows.push(row);
        self.rows.len() >= self.capacity
    }

    fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn deadline_passed(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if now >= deadline)
    }

    /// How long the next poll may wait without overshooting the deadline.
    fn poll_wait(&self, now: Instant, max_wait: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => deadline.saturating_duration_since(now).min(max_wait),
            None => max_wait,
        }
    }

    fn take(&mut self) -> Vec<Notification> {
        self.deadline = None;
        std::mem::take(&mut self.rows)
    }
}

/// Consumes the log bus and persists events as pending notifications.
pub struct Ingestor {
    consumer: EventConsumer,
    store: Arc<dyn NotificationStore>,
    batch_size: usize,
    batch_timeout: Duration,
    poll_max_wait: Duration,
}

impl Ingestor {
    pub fn new(
        consumer: EventConsumer,
        store: Arc<dyn NotificationStore>,
        config: &KafkaConfig,
    ) -> Self {
        Self {
            consumer,
            store,
            batch_size: config.ingest_batch_size,
            batch_timeout: Duration::from_millis(config.ingest_batch_timeout_ms),
            poll_max_wait: Duration::from_millis(config.poll_max_wait_ms),
        }
    }

    /// Run until cancelled. The in-flight batch is flushed before exit.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        info!(
            batch_size = self.batch_size,
            batch_timeout_ms = self.batch_timeout.as_millis() as u64,
            "starting ingestor"
        );

        let mut batch = IngestBatch::new(self.batch_size, self.batch_timeout);

        loop {
            let now = Instant::now();
            let wait = batch.poll_wait(now, self.poll_max_wait);

            let polled = tokio::select! {
                _ = cancel.cancelled() => {
                    self.flush(&mut batch).await;
                    info!("ingestor stopped");
                    return Ok(());
                }
                polled = self.consumer.poll(wait) => polled,
            };

            match polled {
                Ok(Some(event)) => {
                    debug!(
                        event_id = %event.event_id,
                        event_type = %event.event_type,
                        user_id = %event.user_id,
                        "buffering event"
                    );
                    if batch.push(self.to_row(event), Instant::now()) {
                        self.flush(&mut batch).await;
                    }
                }
                Ok(None) => {
                    // Poll timeout or a skipped malformed message.
                }
                Err(e) => {
                    error!(error = %e, "failed to read from Kafka");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }

            if batch.deadline_passed(Instant::now()) {
                self.flush(&mut batch).await;
            }
        }
    }

    fn to_row(&self, event: BusEvent) -> Notification {
        Notification::from_bus_event(event, Utc::now())
    }

    /// Commit the buffered rows to the store, then advance the consumer
    /// offset. A failed store commit drops the batch with per-row logs and
    /// leaves the offset untouched so the events are re-read after restart.
    async fn flush(&self, batch: &mut IngestBatch) {
        if batch.is_empty() {
            return;
        }

        let rows = batch.take();
        match self.store.insert_batch(&rows).await {
            Ok(inserted) => {
                debug!(batch_size = rows.len(), inserted, "batch persisted");
                if let Err(e) = self.consumer.commit() {
                    warn!(error = %e, "failed to commit Kafka offsets");
                }
            }
            Err(e) => {
                error!(error = %e, batch_size = rows.len(), "failed to persist batch, dropping");
                for row in &rows {
                    error!(
                        notification_id = %row.id,
                        user_id = %row.user_id,
                        event_type = %row.event_type,
                        "dropped notification"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NotificationStatus, Priority};
    use std::collections::HashMap;

    fn row(user: &str) -> Notification {
        Notification {
            id: uuid::Uuid::new_v4(),
            user_id: user.to_string(),
            event_type: "job.new".to_string(),
            priority: Priority::High,
            status: NotificationStatus::Pending,
            payload: HashMap::new(),
            event_ts: Utc::now(),
            received_ts: Utc::now(),
            delivered_ts: None,
            owner_id: None,
            lease_deadline: None,
            retry_count: 0,
            last_error: None,
            created_ts: Utc::now(),
        }
    }

    #[tokio::test]
    async fn batch_flushes_at_capacity() {
        let mut batch = IngestBatch::new(3, Duration::from_millis(50));
        let now = Instant::now();

        assert!(!batch.push(row("u1"), now));
        assert!(!batch.push(row("u2"), now));
        assert!(batch.push(row("u3"), now), "third row hits the cap");
        assert_eq!(batch.take().len(), 3);
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn deadline_runs_from_first_buffered_row() {
        let mut batch = IngestBatch::new(100, Duration::from_millis(50));
        let start = Instant::now();

        assert!(!batch.deadline_passed(start), "empty batch has no deadline");

        batch.push(row("u1"), start);
        assert!(!batch.deadline_passed(start + Duration::from_millis(49)));
        assert!(batch.deadline_passed(start + Duration::from_millis(50)));

        // A later row does not push the deadline out.
        batch.push(row("u2"), start + Duration::from_millis(30));
        assert!(batch.deadline_passed(start + Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn poll_wait_is_clamped_by_deadline() {
        let mut batch = IngestBatch::new(100, Duration::from_millis(50));
        let start = Instant::now();
        let max_wait = Duration::from_secs(1);

        assert_eq!(batch.poll_wait(start, max_wait), max_wait);

        batch.push(row("u1"), start);
        assert_eq!(
            batch.poll_wait(start + Duration::from_millis(20), max_wait),
            Duration::from_millis(30)
        );
        assert_eq!(
            batch.poll_wait(start + Duration::from_millis(80), max_wait),
            Duration::ZERO
        );
    }

    #[tokio::test]
    async fn take_resets_the_deadline() {
        let mut batch = IngestBatch::new(100, Duration::from_millis(50));
        let start = Instant::now();

        batch.push(row("u1"), start);
        let _ = batch.take();
        assert!(!batch.deadline_passed(start + Duration::from_secs(10)));
    }
}
