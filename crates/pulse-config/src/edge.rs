// ============================================================================
// Edge Configuration
// ============================================================================

/// Configuration for the SSE edge and sink registry
#[derive(Clone, Debug)]
pub struct EdgeConfig {
    /// Global cap on concurrent push connections across all users
    pub max_connections: usize,
    /// Heartbeat frame cadence on an open stream (seconds)
    pub heartbeat_interval_secs: u64,
    /// Sink liveness timeout; idle sinks past this are evicted (seconds)
    pub stale_sink_timeout_secs: u64,
    /// Registry maintenance cadence (seconds)
    pub maintenance_interval_secs: u64,
    /// Graceful shutdown timeout for the HTTP server (seconds)
    pub shutdown_timeout_secs: u64,
    /// Rows returned by the notification history endpoint
    pub history_limit: i64,
}

impl EdgeConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            max_connections: std::env::var("MAX_SSE_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
            heartbeat_interval_secs: std::env::var("SSE_HEARTBEAT_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            stale_sink_timeout_secs: std::env::var("STALE_SINK_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            maintenance_interval_secs: std::env::var("REGISTRY_MAINTENANCE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            shutdown_timeout_secs: std::env::var("GRACEFUL_SHUTDOWN_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            history_limit: std::env::var("HISTORY_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
        }
    }
}
