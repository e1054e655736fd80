use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::model::StatusUpdate;
use crate::store::NotificationStore;

/// Status flusher: the single consumer of the status channel. Buffers
/// delivery outcomes and applies them as one batch per flush interval.
///
/// The flusher is the last scheduler worker to exit: it only stops once
/// every producer dropped its sender, and it performs an unconditional
/// final flush of whatever is still buffered at that point.
pub(super) async fn run(
    store: Arc<dyn NotificationStore>,
    mut status_rx: mpsc::Receiver<StatusUpdate>,
    flush_interval: Duration,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut buffer: Vec<StatusUpdate> = Vec::new();

    info!("status flusher started");

    loop {
        tokio::select! {
            maybe_update = status_rx.recv() => match maybe_update {
                Some(update) => buffer.push(update),
                None => {
                    // Every delivery worker is gone; drain and exit.
                    flush(&store, &mut buffer).await;
                    info!("status flusher stopped");
                    return;
                }
            },
            _ = ticker.tick() => flush(&store, &mut buffer).await,
        }
    }
}

async fn flush(store: &Arc<dyn NotificationStore>, buffer: &mut Vec<StatusUpdate>) {
    if buffer.is_empty() {
        return;
    }

    let batch = std::mem::take(buffer);
    let started = std::time::Instant::now();

    match store.update_status_batch(&batch).await {
        Ok(()) => {
            info!(
                batch_size = batch.len(),
                duration_ms = started.elapsed().as_millis() as u64,
                "status batch applied"
            );
        }
        Err(e) => {
            // Dropped outcomes leave rows claimed; the sweeper reverts them
            // after the lease expires and delivery runs again.
            error!(
                batch_size = batch.len(),
                error = %e,
                "failed to apply status batch"
            );
        }
    }
}
