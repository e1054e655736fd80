// ============================================================================
// Test Utilities
// ============================================================================
//
// In-memory NotificationStore used to exercise the scheduler and the edge
// without Postgres. Semantics mirror the SQL implementation: claim order,
// conditional status updates, sweep transitions, retry cap.
//
// ============================================================================

#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, Utc};
use pulse_server::model::{
    ClaimedNotification, DeliveryStatus, Notification, NotificationStatus, Priority, StatusUpdate,
    StoreStats,
};
use pulse_server::store::{NotificationStore, SweepOutcome};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

pub struct MemoryStore {
    rows: Mutex<HashMap<Uuid, Notification>>,
    max_retries: i32,
}

impl MemoryStore {
    pub fn new(max_retries: i32) -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            max_retries,
        }
    }

    pub fn seed(&self, rows: Vec<Notification>) {
        let mut map = self.rows.lock().unwrap();
        for row in rows {
            map.insert(row.id, row);
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Notification> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<Notification> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    pub fn count_with_status(&self, status: NotificationStatus) -> usize {
        self.rows
            .lock()
            .unwrap()
            .values()
            .filter(|row| row.status == status)
            .count()
    }
}

#[async_trait::async_trait]
impl NotificationStore for MemoryStore {
    async fn insert_batch(&self, rows: &[Notification]) -> Result<usize> {
        let mut map = self.rows.lock().unwrap();
        let mut inserted = 0;
        for row in rows {
            if map.contains_key(&row.id) {
                continue;
            }
            map.insert(row.id, row.clone());
            inserted += 1;
        }
        Ok(inserted)
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

        let lease_deadline = Utc::now() + chrono::Duration::from_std(lease_duration)?;
        let mut map = self.rows.lock().unwrap();

        let mut candidates: Vec<Uuid> = map
            .values()
            .filter(|row| row.status == NotificationStatus::Pending)
            .map(|row| row.id)
            .collect();
        candidates.sort_by_key(|id| {
            let row = &map[id];
            (row.priority.rank(), row.created_ts, row.id)
        });
        candidates.truncate(max_n as usize);

        let mut claimed = Vec::with_capacity(candidates.len());
        for id in candidates {
            let row = map.get_mut(&id).unwrap();
            row.status = NotificationStatus::Claimed;
            row.owner_id = Some(owner_id.to_string());
            row.lease_deadline = Some(lease_deadline);
            claimed.push(ClaimedNotification {
                id: row.id,
                user_id: row.user_id.clone(),
                event_type: row.event_type.clone(),
                priority: row.priority,
                payload: row.payload.clone(),
                event_ts: row.event_ts,
                received_ts: row.received_ts,
            });
        }
        Ok(claimed)
    }

    async fn update_status_batch(&self, updates: &[StatusUpdate]) -> Result<()> {
        let mut map = self.rows.lock().unwrap();
        for update in updates {
            let Some(row) = map.get_mut(&update.id) else {
                continue;
            };
            if row.status != NotificationStatus::Claimed {
                continue;
            }
            match update.status {
                DeliveryStatus::Pushed => {
                    row.status = NotificationStatus::Pushed;
                    row.delivered_ts = Some(Utc::now());
                }
                DeliveryStatus::Failed => {
                    row.status = NotificationStatus::Failed;
                    if row.retry_count < self.max_retries {
                        row.retry_count += 1;
                    }
                }
            }
            row.last_error = update.error.clone();
            row.owner_id = None;
            row.lease_deadline = None;
        }
        Ok(())
    }

    async fn reclaim_expired(&self) -> Result<SweepOutcome> {
        let now = Utc::now();
        let mut map = self.rows.lock().unwrap();
        let mut outcome = SweepOutcome::default();

        for row in map.values_mut() {
            if row.status != NotificationStatus::Claimed {
                continue;
            }
            let expired = matches!(row.lease_deadline, Some(deadline) if deadline < now);
            if !expired {
                continue;
            }

            row.owner_id = None;
            row.lease_deadline = None;
            if row.retry_count >= self.max_retries {
                row.status = NotificationStatus::Failed;
                row.last_error = Some("retry cap".to_string());
                outcome.exhausted += 1;
            } else {
                row.status = NotificationStatus::Pending;
                row.retry_count += 1;
                outcome.reverted += 1;
            }
        }
        Ok(outcome)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let map = self.rows.lock().unwrap();
        let mut stats = StoreStats::default();
        for row in map.values() {
            match row.status {
                NotificationStatus::Pending => stats.pending += 1,
                NotificationStatus::Claimed => stats.claimed += 1,
                NotificationStatus::Pushed => stats.pushed += 1,
                NotificationStatus::Failed => stats.failed += 1,
            }
            stats.total += 1;
        }
        Ok(stats)
    }

    async fn recent_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<Notification>> {
        let map = self.rows.lock().unwrap();
        let mut rows: Vec<Notification> = map
            .values()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.event_ts.cmp(&a.event_ts));
        rows.truncate(limit as usize);
        Ok(rows)
    }
}

/// Build a pending row the way the ingestor would.
pub fn pending_row(user_id: &str, event_type: &str, created_ts: DateTime<Utc>) -> Notification {
    Notification {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        event_type: event_type.to_string(),
        priority: Priority::for_event_type(event_type),
        status: NotificationStatus::Pending,
        payload: HashMap::from([("k".to_string(), "v".to_string())]),
        event_ts: created_ts,
        received_ts: created_ts,
        delivered_ts: None,
        owner_id: None,
        lease_deadline: None,
        retry_count: 0,
        last_error: None,
        created_ts,
    }
}
