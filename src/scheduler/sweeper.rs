use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::store::NotificationStore;

/// Lease sweeper: periodically reverts `claimed` rows whose lease deadline
/// passed back to `pending`, failing rows that exhausted the retry cap.
/// This is the only path that resurrects orphaned claims; the claim query
/// itself never looks at expired leases.
pub(super) async fn run(
    store: Arc<dyn NotificationStore>,
    sweep_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(sweep_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!("lease sweeper started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match store.reclaim_expired().await {
                    Ok(outcome) if outcome.total() > 0 => {
                        warn!(
                            reverted = outcome.reverted,
                            exhausted = outcome.exhausted,
                            "reset expired leases"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "failed to reclaim expired leases");
                    }
                }
            }
            _ = cancel.cancelled() => {
                info!("lease sweeper stopped");
                return;
            }
        }
    }
}
