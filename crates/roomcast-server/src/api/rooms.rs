use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use roomcast_protocol::RoomSummary;

pub async fn list_rooms(State(state): State<AppState>) -> Json<Vec<RoomSummary>> {
    Json(state.sessions.room_summaries().await)
}

pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomSummary>> {
    let summary = state
        .sessions
        .room_summary(&room_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("room {}", room_id)))?;
    Ok(Json(summary))
}
