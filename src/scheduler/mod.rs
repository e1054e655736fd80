// ============================================================================
// Scheduler - dual worker pools for claim and delivery
// ============================================================================
//
// Pool 1: claim workers lease pending rows from the store.
// Pool 2: delivery workers fan claimed rows out via the sink registry.
// A single status flusher batches outcomes back to the store; a sweeper
// reverts expired leases.
//
// Shutdown cascade: cancellation stops the claim workers, which closes the
// hand-off channel; delivery workers drain it and exit, which closes the
// status channel; the flusher performs its final drain and exits last.
//
// ============================================================================

mod claim;
mod delivery;
mod flusher;
mod sweeper;

use pulse_config::SchedulerConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::model::{ClaimedNotification, StatusUpdate};
use crate::registry::SinkRegistry;
use crate::store::NotificationStore;

pub struct Scheduler {
    store: Arc<dyn NotificationStore>,
    registry: Arc<SinkRegistry>,
    config: SchedulerConfig,
    owner_id: String,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        registry: Arc<SinkRegistry>,
        config: SchedulerConfig,
        owner_id: String,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            owner_id,
        }
    }

    /// Run all worker pools until cancelled, then drain in order.
    pub async fn run(self, cancel: CancellationToken) {
        let cfg = &self.config;

        info!(
            owner_id = %self.owner_id,
            claim_workers = cfg.claim_workers,
            delivery_workers = cfg.delivery_workers,
            batch_size = cfg.batch_size,
            "starting scheduler"
        );

        let (hand_off_tx, hand_off_rx) =
            mpsc::channel::<ClaimedNotification>(cfg.hand_off_capacity);
        let hand_off_rx = Arc::new(Mutex::new(hand_off_rx));
        let (status_tx, status_rx) = mpsc::channel::<StatusUpdate>(cfg.hand_off_capacity);

        let poll_interval = Duration::from_millis(cfg.poll_interval_ms);
        let lease_duration = Duration::from_secs(cfg.lease_duration_secs);

        let mut claim_set: JoinSet<()> = JoinSet::new();
        for worker_id in 0..cfg.claim_workers {
            claim_set.spawn(claim::run(
                worker_id,
                self.store.clone(),
                self.owner_id.clone(),
                poll_interval,
                lease_duration,
                cfg.batch_size,
                hand_off_tx.clone(),
                cancel.clone(),
            ));
        }

        let mut delivery_set: JoinSet<()> = JoinSet::new();
        for worker_id in 0..cfg.delivery_workers {
            delivery_set.spawn(delivery::run(
                worker_id,
                self.registry.clone(),
                hand_off_rx.clone(),
                status_tx.clone(),
            ));
        }

        let flusher_handle = tokio::spawn(flusher::run(
            self.store.clone(),
            status_rx,
            Duration::from_millis(cfg.status_flush_interval_ms),
        ));

        let sweeper_handle = tokio::spawn(sweeper::run(
            self.store.clone(),
            Duration::from_secs(cfg.sweep_interval_secs),
            cancel.clone(),
        ));

        let metrics_handle = tokio::spawn(metrics_reporter(
            self.store.clone(),
            self.registry.clone(),
            hand_off_tx.downgrade(),
            status_tx.downgrade(),
            Duration::from_secs(cfg.metrics_interval_secs),
            cancel.clone(),
        ));

        // Panics are contained per worker: a crashed worker is logged and
        // respawned until shutdown begins.
        let mut next_claim_id = cfg.claim_workers;
        while let Some(result) = claim_set.join_next().await {
            if let Err(e) = result {
                if e.is_panic() && !cancel.is_cancelled() {
                    error!(error = %e, "claim worker panicked, restarting");
                    claim_set.spawn(claim::run(
                        next_claim_id,
                        self.store.clone(),
                        self.owner_id.clone(),
                        poll_interval,
                        lease_duration,
                        cfg.batch_size,
                        hand_off_tx.clone(),
                        cancel.clone(),
                    ));
                    next_claim_id += 1;
                } else if e.is_panic() {
                    error!(error = %e, "claim worker panicked during shutdown");
                }
            }
        }
        drop(hand_off_tx);

        let mut next_delivery_id = cfg.delivery_workers;
        while let Some(result) = delivery_set.join_next().await {
            if let Err(e) = result {
                if e.is_panic() && !cancel.is_cancelled() {
                    error!(error = %e, "delivery worker panicked, restarting");
                    delivery_set.spawn(delivery::run(
                        next_delivery_id,
                        self.registry.clone(),
                        hand_off_rx.clone(),
                        status_tx.clone(),
                    ));
                    next_delivery_id += 1;
                } else if e.is_panic() {
                    error!(error = %e, "delivery worker panicked during shutdown");
                }
            }
        }
        drop(status_tx);

        // The flusher exits after its final drain; nothing is lost.
        if let Err(e) = flusher_handle.await {
            error!(error = %e, "status flusher task failed");
        }
        if let Err(e) = sweeper_handle.await {
            error!(error = %e, "sweeper task failed");
        }
        if let Err(e) = metrics_handle.await {
            error!(error = %e, "metrics task failed");
        }

        info!("scheduler stopped");
    }
}

/// Periodic visibility into the pipeline: channel depths, live connections,
/// and per-status row counts.
async fn metrics_reporter(
    store: Arc<dyn NotificationStore>,
    registry: Arc<SinkRegistry>,
    hand_off_tx: mpsc::WeakSender<ClaimedNotification>,
    status_tx: mpsc::WeakSender<StatusUpdate>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!("metrics reporter started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let hand_off_depth = hand_off_tx
                    .upgrade()
                    .map(|tx| tx.max_capacity() - tx.capacity());
                let status_depth = status_tx
                    .upgrade()
                    .map(|tx| tx.max_capacity() - tx.capacity());

                match store.stats().await {
                    Ok(stats) => {
                        info!(
                            pending = stats.pending,
                            claimed = stats.claimed,
                            pushed = stats.pushed,
                            failed = stats.failed,
                            hand_off_depth = ?hand_off_depth,
                            status_depth = ?status_depth,
                            active_connections = registry.active_connections(),
                            "scheduler metrics"
                        );
                    }
                    Err(e) => error!(error = %e, "failed to read store stats"),
                }
            }
            _ = cancel.cancelled() => {
                info!("metrics reporter stopped");
                return;
            }
        }
    }
}
