// ============================================================================
// Pulse Notification Service
// ============================================================================
//
// Wires the three core subsystems together:
// - Ingestor: Kafka topic -> Postgres (pending rows)
// - Scheduler: claim / deliver / acknowledge worker pools
// - Edge: SSE streams + notification history over HTTP
//
// ============================================================================

use anyhow::{Context, Result};
use pulse_config::Config;
use pulse_server::ingest::Ingestor;
use pulse_server::kafka::EventConsumer;
use pulse_server::registry::SinkRegistry;
use pulse_server::routes::{self, AppState};
use pulse_server::scheduler::Scheduler;
use pulse_server::store::{NotificationStore, PgNotificationStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    let config = Arc::new(config);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== Pulse Notification Service Starting ===");
    info!(owner_id = %config.owner_id, port = config.port, "replica identity");

    // Store
    info!("Connecting to Postgres...");
    let store = PgNotificationStore::connect(
        &config.database_url,
        &config.db,
        config.scheduler.max_retries,
    )
    .await
    .context("Failed to connect to Postgres")?;

    sqlx::migrate!("./migrations")
        .run(store.pool())
        .await
        .context("Failed to run migrations")?;
    info!("Connected to Postgres");

    let store: Arc<dyn NotificationStore> = Arc::new(store);

    // Registry
    let registry = Arc::new(SinkRegistry::new(
        config.edge.max_connections,
        Duration::from_secs(config.edge.stale_sink_timeout_secs),
    ));

    // Root cancellation: SIGTERM / SIGINT flips it, every loop selects on it.
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    // Ingestor
    let consumer = EventConsumer::new(&config.kafka).context("Failed to create Kafka consumer")?;
    let ingestor = Ingestor::new(consumer, store.clone(), &config.kafka);
    let ingest_handle = tokio::spawn(ingestor.run(cancel.clone()));

    // Scheduler
    let scheduler = Scheduler::new(
        store.clone(),
        registry.clone(),
        config.scheduler.clone(),
        config.owner_id.clone(),
    );
    let scheduler_handle = tokio::spawn(scheduler.run(cancel.clone()));

    // Registry maintenance
    let maintenance_handle = tokio::spawn(registry.clone().run_maintenance(
        Duration::from_secs(config.edge.maintenance_interval_secs),
        cancel.clone(),
    ));

    // Edge
    let state = AppState {
        store,
        registry,
        config: config.clone(),
        shutdown: cancel.clone(),
    };
    let app = routes::router(state);

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    info!(addr = %config.bind_address, "HTTP server listening");

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
    });

    cancel.cancelled().await;
    info!("shutting down...");

    let shutdown_timeout = Duration::from_secs(config.edge.shutdown_timeout_secs);
    match tokio::time::timeout(shutdown_timeout, server_handle).await {
        Ok(Ok(Ok(()))) => info!("HTTP server stopped"),
        Ok(Ok(Err(e))) => error!(error = %e, "HTTP server error"),
        Ok(Err(e)) => error!(error = %e, "HTTP server task failed"),
        Err(_) => warn!(
            timeout_secs = shutdown_timeout.as_secs(),
            "graceful shutdown timed out, abandoning open connections"
        ),
    }

    if let Err(e) = ingest_handle.await.context("ingestor task failed")? {
        error!(error = %e, "ingestor exited with error");
    }
    scheduler_handle.await.context("scheduler task failed")?;
    maintenance_handle
        .await
        .context("registry maintenance task failed")?;

    info!("server exited");
    Ok(())
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("SIGTERM received, initiating graceful shutdown...");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("SIGINT received, initiating graceful shutdown...");
                }
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok();
            info!("Ctrl-C received, initiating graceful shutdown...");
        }
        cancel.cancel();
    });
}
