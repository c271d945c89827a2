//! Manual unlock handler.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::super::types::{AdminState, ErrorResponse};
use crate::lockout::normalize_key;

/// Clears the lockout record for `key` (`account:<name>` or `ip:<addr>`).
///
/// The key is normalised the way the tracker stores it, so `account:Admin`
/// clears `account:admin`. 204 when a record was cleared, 404 when none
/// existed, 400 for a key that is neither form.
pub async fn unlock_handler(State(state): State<AdminState>, Path(key): Path<String>) -> Response {
    let Some(normalized) = normalize_key(&key) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "invalid_key",
                message: format!("expected account:<name> or ip:<addr>, got '{}'", key),
            }),
        )
            .into_response();
    };

    if !state.engine.tracker().record_success(&normalized).await {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "not_found",
                message: format!("no lockout record for '{}'", normalized),
            }),
        )
            .into_response();
    }
    log::info!(target: crate::engine::AUDIT_TARGET, "Manual unlock of {}", normalized);
    StatusCode::NO_CONTENT.into_response()
}
