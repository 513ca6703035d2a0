use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;

use crate::AppState;

/// `GET /unread-counts/{user_id}` — counterpart id -> unread total.
/// Recomputed from the message log on every call; nothing is cached.
pub async fn get_unread_counts(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let viewer = user_id.clone();

    let counts = tokio::task::spawn_blocking(move || db.unread_counts(&viewer))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("Failed to load unread counts for {}: {}", user_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let counts: HashMap<String, i64> = counts.into_iter().collect();
    Ok(Json(counts))
}
