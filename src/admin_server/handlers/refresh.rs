//! Manual GeoIP refresh handler.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::super::types::{AdminState, ErrorResponse};

/// Runs one refresh. 200 with the outcome, 502 when the refresh failed.
pub async fn refresh_handler(State(state): State<AdminState>) -> Response {
    match state.scheduler.refresh_once().await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse {
                error: e.kind(),
                message: e.to_string(),
            }),
        )
            .into_response(),
    }
}
