use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, warn};

use confab_types::models::Message;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination — pass the `created_at` timestamp of the
    /// oldest message from the previous page to fetch older messages.
    pub before: Option<String>,
}

fn default_limit() -> u32 {
    50
}

/// `GET /rooms/{room_id}/messages` — persisted history, newest first.
/// This is the offline catch-up path: a recipient who missed the realtime
/// relay picks the messages up here.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let rid = room_id.clone();
    let limit = query.limit.min(200);
    let before = query.before;

    let rows = tokio::task::spawn_blocking(move || db.get_history(&rid, limit, before.as_deref()))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("Failed to load history for room {}: {}", room_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let messages: Vec<Message> = rows
        .into_iter()
        .filter_map(|row| match row.into_message() {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!("Skipping corrupt history row: {}", e);
                None
            }
        })
        .collect();

    Ok(Json(messages))
}
