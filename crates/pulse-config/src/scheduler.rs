// ============================================================================
// Scheduler Configuration
// ============================================================================

/// Configuration for the claim/deliver/acknowledge worker pools
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Parallel claim loops polling the store
    pub claim_workers: usize,
    /// Parallel fan-out attempts
    pub delivery_workers: usize,
    /// Rows per claim
    pub batch_size: i64,
    /// Claim cadence per worker (milliseconds)
    pub poll_interval_ms: u64,
    /// Claim lifetime (seconds)
    pub lease_duration_secs: u64,
    /// Claim -> delivery channel bound
    pub hand_off_capacity: usize,
    /// Status update batching cadence (milliseconds)
    pub status_flush_interval_ms: u64,
    /// Expiry sweep cadence (seconds)
    pub sweep_interval_secs: u64,
    /// Metrics log cadence (seconds)
    pub metrics_interval_secs: u64,
    /// Terminal failure threshold for lease-expiry retries
    pub max_retries: i32,
}

impl SchedulerConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            claim_workers: std::env::var("CLAIM_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            delivery_workers: std::env::var("DELIVERY_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
            batch_size: std::env::var("CLAIM_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            poll_interval_ms: std::env::var("CLAIM_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            lease_duration_secs: std::env::var("LEASE_DURATION_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            hand_off_capacity: std::env::var("HAND_OFF_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),
            status_flush_interval_ms: std::env::var("STATUS_FLUSH_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            sweep_interval_secs: std::env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            metrics_interval_secs: std::env::var("METRICS_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            max_retries: std::env::var("MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
        }
    }
}
