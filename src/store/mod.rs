// ============================================================================
// Notification Store
// ============================================================================
//
// Sole keeper of durable notification state. All lifecycle transitions go
// through the operations below; no caller touches rows directly.
//
// ============================================================================

mod postgres;

pub use postgres::PgNotificationStore;

use crate::model::{ClaimedNotification, Notification, StatusUpdate, StoreStats};
use anyhow::Result;
use std::time::Duration;

/// Result of one lease sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Rows returned to `pending` with an incremented retry count
    pub reverted: u64,
    /// Rows moved to terminal `failed` because the retry cap was reached
    pub exhausted: u64,
}

impl SweepOutcome {
    pub fn total(&self) -> u64 {
        self.reverted + self.exhausted
    }
}

/// Storage interface for notification rows.
///
/// The production implementation is PostgreSQL; the trait exists so the
/// scheduler can be exercised against an in-memory store in tests. Any
/// substitute MUST provide claim semantics equivalent to
/// `SELECT ... FOR UPDATE SKIP LOCKED`: concurrent claimers never receive
/// overlapping rows.
#[async_trait::async_trait]
pub trait NotificationStore: Send + Sync {
    /// Atomically insert a batch of `pending` rows. Duplicate ids are
    /// skipped with a log entry; the rest of the batch proceeds. Returns
    /// the number of rows actually inserted.
    async fn insert_batch(&self, rows: &[Notification]) -> Result<usize>;

    /// Claim up to `max_n` pending rows for `owner_id` under a lease,
    /// ordered by priority (HIGH first) then created_ts. Only touches
    /// `pending` rows; expired leases are the sweeper's job.
    async fn claim_batch(
        &self,
        owner_id: &str,
        lease_duration: Duration,
        max_n: i64,
    ) -> Result<Vec<ClaimedNotification>>;

    /// Apply delivery outcomes in one transaction. Each update is
    /// conditional on the row still being `claimed`; rows the sweeper
    /// already reclaimed are silently skipped.
    async fn update_status_batch(&self, updates: &[StatusUpdate]) -> Result<()>;

    /// Revert `claimed` rows whose lease deadline has passed. Rows at the
    /// retry cap go to terminal `failed` with `last_error = "retry cap"`.
    async fn reclaim_expired(&self) -> Result<SweepOutcome>;

    /// Per-status row counts.
    async fn stats(&self) -> Result<StoreStats>;

    /// Most recent notifications for one user, newest first.
    async fn recent_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<Notification>>;
}
