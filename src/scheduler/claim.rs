use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::model::ClaimedNotification;
use crate::store::NotificationStore;

/// Claim worker: polls the store on a fixed cadence, claims a batch of
/// pending rows under this replica's lease, and hands every row to the
/// delivery pool. A full hand-off channel blocks the worker, which is the
/// intended back-pressure: claiming stops before rows pile up in memory.
pub(super) async fn run(
    worker_id: usize,
    store: Arc<dyn NotificationStore>,
    owner_id: String,
    poll_interval: Duration,
    lease_duration: Duration,
    batch_size: i64,
    hand_off_tx: mpsc::Sender<ClaimedNotification>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(worker_id, "claim worker started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(worker_id, "claim worker stopped");
                return;
            }
            _ = ticker.tick() => {
                let batch = match store
                    .claim_batch(&owner_id, lease_duration, batch_size)
                    .await
                {
                    Ok(batch) => batch,
                    Err(e) => {
                        // Transient store errors retry at the next tick.
                        error!(worker_id, error = %e, "failed to claim notifications");
                        continue;
                    }
                };

                if batch.is_empty() {
                    continue;
                }

                debug!(worker_id, count = batch.len(), "claimed notifications");

                for notification in batch {
                    tokio::select! {
                        sent = hand_off_tx.send(notification) => {
                            if sent.is_err() {
                                info!(worker_id, "hand-off channel closed, claim worker stopped");
                                return;
                            }
                        }
                        _ = cancel.cancelled() => {
                            // Unsent rows stay claimed; the sweeper returns
                            // them to pending after the lease expires.
                            info!(worker_id, "claim worker stopped");
                            return;
                        }
                    }
                }
            }
        }
    }
}
