use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use pulse_config::DbConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use super::{NotificationStore, SweepOutcome};
use crate::model::{
    ClaimedNotification, Notification, NotificationStatus, Priority, StatusUpdate, StoreStats,
};

/// PostgreSQL-backed notification store.
///
/// The claim path relies on `FOR UPDATE SKIP LOCKED` so that concurrent
/// claimers on any number of replicas never receive overlapping rows. The
/// hot access paths are covered by partial indexes on
/// `(status, priority rank, created_ts)` for pending rows and
/// `(lease_deadline)` for claimed rows; see the migrations.
pub struct PgNotificationStore {
    pool: PgPool,
    op_timeout: Duration,
    max_retries: i32,
}

impl PgNotificationStore {
    pub async fn connect(database_url: &str, db: &DbConfig, max_retries: i32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(db.max_connections)
            .acquire_timeout(Duration::from_secs(db.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(db.idle_timeout_secs))
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;

        Ok(Self {
            pool,
            op_timeout: Duration::from_secs(db.operation_timeout_secs),
            max_retries,
        })
    }

    pub fn from_pool(pool: PgPool, op_timeout: Duration, max_retries: i32) -> Self {
        Self {
            pool,
            op_timeout,
            max_retries,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Every public operation runs under the configured deadline so a stuck
    /// connection cannot wedge a worker loop.
    async fn with_deadline<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => bail!(
                "store operation timed out after {}s",
                self.op_timeout.as_secs()
            ),
        }
    }
}

/// Stored priorities come from our own ingest path, but a row edited by
/// hand should degrade rather than poison a claim batch.
fn priority_from_db(raw: &str) -> Priority {
    Priority::parse(raw).unwrap_or_else(|| {
        tracing::warn!(priority = %raw, "unknown priority in store, treating as MEDIUM");
        Priority::Medium
    })
}

fn status_from_db(raw: &str) -> NotificationStatus {
    NotificationStatus::parse(raw).unwrap_or_else(|| {
        tracing::warn!(status = %raw, "unknown status in store, treating as failed");
        NotificationStatus::Failed
    })
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    user_id: String,
    event_type: String,
    priority: String,
    status: String,
    payload: Json<HashMap<String, String>>,
    event_ts: DateTime<Utc>,
    received_ts: DateTime<Utc>,
    delivered_ts: Option<DateTime<Utc>>,
    owner_id: Option<String>,
    lease_deadline: Option<DateTime<Utc>>,
    retry_count: i32,
    last_error: Option<String>,
    created_ts: DateTime<Utc>,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Notification {
            id: row.id,
            user_id: row.user_id,
            event_type: row.event_type,
            priority: priority_from_db(&row.priority),
            status: status_from_db(&row.status),
            payload: row.payload.0,
            event_ts: row.event_ts,
            received_ts: row.received_ts,
            delivered_ts: row.delivered_ts,
            owner_id: row.owner_id,
            lease_deadline: row.lease_deadline,
            retry_count: row.retry_count,
            last_error: row.last_error,
            created_ts: row.created_ts,
        }
    }
}

#[async_trait::async_trait]
impl NotificationStore for PgNotificationStore {
    async fn insert_batch(&self, rows: &[Notification]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        self.with_deadline(async {
            let mut tx = self
                .pool
                .begin()
                .await
                .context("Failed to begin insert transaction")?;

            let mut inserted = 0usize;
            for row in rows {
                let result = sqlx::query(
                    r#"
                    INSERT INTO notifications (
                        id, user_id, event_type, priority, status, payload,
                        event_ts, received_ts, retry_count, created_ts
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    ON CONFLICT (id) DO NOTHING
                    "#,
                )
                .bind(row.id)
                .bind(&row.user_id)
                .bind(&row.event_type)
                .bind(row.priority.as_str())
                .bind(row.status.as_str())
                .bind(Json(&row.payload))
                .bind(row.event_ts)
                .bind(row.received_ts)
                .bind(row.retry_count)
                .bind(row.created_ts)
                .execute(&mut *tx)
                .await
                .context("Failed to insert notification")?;

                if result.rows_affected() == 0 {
                    tracing::warn!(
                        notification_id = %row.id,
                        user_id = %row.user_id,
                        "duplicate notification id, skipping"
                    );
                } else {
                    inserted += 1;
                }
            }

            tx.commit()
                .await
                .context("Failed to commit insert transaction")?;

            tracing::debug!(count = inserted, "batch inserted");
            Ok(inserted)
        })
        .await
    }

    async fn claim_batch(
        &self,
        owner_id: &str,
        lease_duration: Duration,
        max_n: i64,
    ) -> Result<Vec<ClaimedNotification>> {
        if max_n <= 0 {
            return Ok(Vec::new());
        }

        let lease_deadline = Utc::now()
            + chrono::Duration::from_std(lease_duration).context("lease duration out of range")?;

        self.with_deadline(async {
            let rows: Vec<(
                Uuid,
                String,
                String,
                String,
                Json<HashMap<String, String>>,
                DateTime<Utc>,
                DateTime<Utc>,
            )> = sqlx::query_as(
                r#"
                UPDATE notifications
                SET status = 'claimed',
                    owner_id = $1,
                    lease_deadline = $2
                FROM (
                    SELECT id
                    FROM notifications
                    WHERE status = 'pending'
                    ORDER BY
                        CASE priority WHEN 'HIGH' THEN 0 WHEN 'MEDIUM' THEN 1 ELSE 2 END,
                        created_ts ASC
                    LIMIT $3
                    FOR UPDATE SKIP LOCKED
                ) AS batch
                WHERE notifications.id = batch.id
                RETURNING
                    notifications.id,
                    notifications.user_id,
                    notifications.event_type,
                    notifications.priority,
                    notifications.payload,
                    notifications.event_ts,
                    notifications.received_ts
                "#,
            )
            .bind(owner_id)
            .bind(lease_deadline)
            .bind(max_n)
            .fetch_all(&self.pool)
            .await
            .context("Failed to claim batch")?;

            Ok(rows
                .into_iter()
                .map(
                    |(id, user_id, event_type, priority, Json(payload), event_ts, received_ts)| {
                        ClaimedNotification {
                            id,
                            user_id,
                            event_type,
                            priority: priority_from_db(&priority),
                            payload,
                            event_ts,
                            received_ts,
                        }
                    },
                )
                .collect())
        })
        .await
    }

    async fn update_status_batch(&self, updates: &[StatusUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        self.with_deadline(async {
            let mut tx = self
                .pool
                .begin()
                .await
                .context("Failed to begin status transaction")?;

            for update in updates {
                let result = sqlx::query(
                    r#"
                    UPDATE notifications
                    SET status = $1,
                        delivered_ts = CASE WHEN $1 = 'pushed' THEN NOW() ELSE delivered_ts END,
                        retry_count = CASE
                            WHEN $1 = 'failed' AND retry_count < $2 THEN retry_count + 1
                            ELSE retry_count
                        END,
                        last_error = $3,
                        owner_id = NULL,
                        lease_deadline = NULL
                    WHERE id = $4
                      AND status = 'claimed'
                    "#,
                )
                .bind(update.status.as_str())
                .bind(self.max_retries)
                .bind(update.error.as_deref())
                .bind(update.id)
                .execute(&mut *tx)
                .await
                .context("Failed to update notification status")?;

                // A zero here means the sweeper raced us and reclaimed the
                // lease; the row will be delivered again.
                if result.rows_affected() == 0 {
                    tracing::debug!(
                        notification_id = %update.id,
                        status = update.status.as_str(),
                        "status update skipped, row no longer claimed"
                    );
                }
            }

            tx.commit()
                .await
                .context("Failed to commit status transaction")?;

            Ok(())
        })
        .await
    }

    async fn reclaim_expired(&self) -> Result<SweepOutcome> {
        self.with_deadline(async {
            let mut tx = self
                .pool
                .begin()
                .await
                .context("Failed to begin sweep transaction")?;

            // Rows at the cap terminate instead of cycling forever.
            let exhausted = sqlx::query(
                r#"
                UPDATE notifications
                SET status = 'failed',
                    owner_id = NULL,
                    lease_deadline = NULL,
                    last_error = 'retry cap'
                WHERE status = 'claimed'
                  AND lease_deadline < NOW()
                  AND retry_count >= $1
                "#,
            )
            .bind(self.max_retries)
            .execute(&mut *tx)
            .await
            .context("Failed to fail retry-capped rows")?
            .rows_affected();

            let reverted = sqlx::query(
                r#"
                UPDATE notifications
                SET status = 'pending',
                    owner_id = NULL,
                    lease_deadline = NULL,
                    retry_count = retry_count + 1
                WHERE status = 'claimed'
                  AND lease_deadline < NOW()
                "#,
            )
            .execute(&mut *tx)
            .await
            .context("Failed to reclaim expired leases")?
            .rows_affected();

            tx.commit()
                .await
                .context("Failed to commit sweep transaction")?;

            Ok(SweepOutcome {
                reverted,
                exhausted,
            })
        })
        .await
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.with_deadline(async {
            let (pending, claimed, pushed, failed, total): (i64, i64, i64, i64, i64) =
                sqlx::query_as(
                    r#"
                    SELECT
                        COUNT(*) FILTER (WHERE status = 'pending'),
                        COUNT(*) FILTER (WHERE status = 'claimed'),
                        COUNT(*) FILTER (WHERE status = 'pushed'),
                        COUNT(*) FILTER (WHERE status = 'failed'),
                        COUNT(*)
                    FROM notifications
                    "#,
                )
                .fetch_one(&self.pool)
                .await
                .context("Failed to query store stats")?;

            Ok(StoreStats {
                pending,
                claimed,
                pushed,
                failed,
                total,
            })
        })
        .await
    }

    async fn recent_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<Notification>> {
        self.with_deadline(async {
            let rows: Vec<NotificationRow> = sqlx::query_as(
                r#"
                SELECT id, user_id, event_type, priority, status, payload,
                       event_ts, received_ts, delivered_ts, owner_id,
                       lease_deadline, retry_count, last_error, created_ts
                FROM notifications
                WHERE user_id = $1
                ORDER BY event_ts DESC
                LIMIT $2
                "#,
            )
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query user notifications")?;

            Ok(rows.into_iter().map(Notification::from).collect())
        })
        .await
    }
}
