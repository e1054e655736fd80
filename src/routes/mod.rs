use axum::routing::get;
use axum::Router;
use pulse_config::Config;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::registry::SinkRegistry;
use crate::store::NotificationStore;

mod health;
mod notifications;
mod stream;

/// Shared state for the edge surface.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn NotificationStore>,
    pub registry: Arc<SinkRegistry>,
    pub config: Arc<Config>,
    /// Root shutdown token; open streams end when it fires so graceful
    /// shutdown does not wait out the full timeout.
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/notifications/stream", get(stream::stream))
        .route("/notifications/{user_id}", get(notifications::recent))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
