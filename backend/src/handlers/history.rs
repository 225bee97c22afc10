// src/handlers/history.rs

use axum::{Extension, Json, extract::State, response::IntoResponse};

use crate::{
    error::AppError,
    models::exam_record::{HistoryResponse, HistoryStats},
    state::AppState,
    utils::jwt::Claims,
};

/// The caller's finalized exams, newest first, with aggregate stats.
pub async fn get_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let exam_history = state
        .history
        .list_for_user(claims.user_id())
        .await
        .map_err(|e| {
            tracing::error!("Failed to load history for {}: {}", claims.user_id(), e);
            e
        })?;

    let stats = HistoryStats::from_records(&exam_history);

    Ok(Json(HistoryResponse {
        exam_history,
        stats,
    }))
}
