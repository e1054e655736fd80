use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::model::{ClaimedNotification, StatusUpdate};
use crate::registry::SinkRegistry;

/// Delivery worker: pulls one claimed notification at a time, fans it out
/// through the registry, and reports the outcome on the status channel.
///
/// Delivery never retries synchronously; a failure is terminal at this
/// replica and retries happen only through lease expiry plus re-claim.
/// The worker drains the hand-off channel to the end so that rows already
/// claimed at shutdown still get their status flushed.
pub(super) async fn run(
    worker_id: usize,
    registry: Arc<SinkRegistry>,
    hand_off_rx: Arc<Mutex<mpsc::Receiver<ClaimedNotification>>>,
    status_tx: mpsc::Sender<StatusUpdate>,
) {
    info!(worker_id, "delivery worker started");

    loop {
        let notification = { hand_off_rx.lock().await.recv().await };
        let Some(notification) = notification else {
            info!(worker_id, "delivery worker stopped");
            return;
        };

        let started = std::time::Instant::now();
        let update = attempt(&registry, &notification);
        let latency_ms = started.elapsed().as_millis() as u64;

        match &update.error {
            None => {
                debug!(
                    worker_id,
                    notification_id = %notification.id,
                    user_id = %notification.user_id,
                    priority = notification.priority.as_str(),
                    latency_ms,
                    "delivered notification"
                );
            }
            Some(error) => {
                warn!(
                    worker_id,
                    notification_id = %notification.id,
                    user_id = %notification.user_id,
                    priority = notification.priority.as_str(),
                    latency_ms,
                    error = %error,
                    "delivery failed"
                );
            }
        }

        if status_tx.send(update).await.is_err() {
            info!(worker_id, "status channel closed, delivery worker stopped");
            return;
        }
    }
}

fn attempt(registry: &SinkRegistry, notification: &ClaimedNotification) -> StatusUpdate {
    let frame = match serde_json::to_string(&notification.frame()) {
        Ok(frame) => frame,
        Err(e) => return StatusUpdate::failed(notification.id, format!("encode frame: {e}")),
    };

    match registry.send(&notification.user_id, &frame) {
        Ok(()) => StatusUpdate::pushed(notification.id),
        Err(e) => StatusUpdate::failed(notification.id, e.to_string()),
    }
}
