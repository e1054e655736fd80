use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use chrono::Utc;
use futures_util::stream::{self, Stream};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::AppState;
use crate::error::AppError;
use crate::registry::{Sink, SinkRegistry};

#[derive(Deserialize)]
pub struct StreamParams {
    user_id: Option<String>,
}

/// Unregisters the sink when the stream is dropped, whichever way the
/// connection ends.
struct StreamGuard {
    registry: Arc<SinkRegistry>,
    sink: Arc<Sink>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        info!(user_id = %self.sink.user_id(), "push stream closed");
        self.registry.unregister(&self.sink);
    }
}

struct StreamState {
    rx: mpsc::Receiver<String>,
    heartbeat: tokio::time::Interval,
    shutdown: CancellationToken,
    guard: StreamGuard,
}

/// `GET /notifications/stream?user_id=<id>`
///
/// Long-lived text/event-stream connection. Emits a `connected` preamble,
/// then `notification` frames as they are fanned out, with a `heartbeat`
/// frame every heartbeat interval. Ends on client disconnect, sink
/// eviction, or process shutdown.
pub async fn stream(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let user_id = params
        .user_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::validation("user_id is required"))?;

    let (sink, rx) = state
        .registry
        .register(&user_id)
        .map_err(|_| AppError::CapacityExceeded)?;

    info!(user_id = %user_id, "push stream opened");

    let heartbeat_interval = Duration::from_secs(state.config.edge.heartbeat_interval_secs);
    let mut heartbeat =
        tokio::time::interval_at(tokio::time::Instant::now() + heartbeat_interval, heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let guard = StreamGuard {
        registry: state.registry.clone(),
        sink,
    };

    let connected = stream::once(async {
        Ok::<_, Infallible>(
            Event::default()
                .event("connected")
                .data(json!({"status": "connected"}).to_string()),
        )
    });

    let frames = stream::unfold(
        StreamState {
            rx,
            heartbeat,
            shutdown: state.shutdown.clone(),
            guard,
        },
        |mut st| async move {
            let event = tokio::select! {
                maybe_frame = st.rx.recv() => match maybe_frame {
                    Some(frame) => Event::default().event("notification").data(frame),
                    // Sink evicted or unregistered: end the stream.
                    None => return None,
                },
                _ = st.heartbeat.tick() => Event::default()
                    .event("heartbeat")
                    .data(json!({"timestamp": Utc::now().to_rfc3339()}).to_string()),
                _ = st.shutdown.cancelled() => return None,
            };

            st.guard.sink.touch();
            Some((Ok::<_, Infallible>(event), st))
        },
    );

    Ok(Sse::new(connected.chain(frames)))
}
