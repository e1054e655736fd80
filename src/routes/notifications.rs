use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::error::AppResult;

/// Recent notification history for one user, newest first. Clients call
/// this after (re)connecting to catch up on anything delivery missed while
/// they had no live stream.
pub async fn recent(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let notifications = state
        .store
        .recent_for_user(&user_id, state.config.edge.history_limit)
        .await?;

    Ok(Json(json!({
        "user_id": user_id,
        "count": notifications.len(),
        "notifications": notifications,
    })))
}
