//! JSON status handler.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;

use super::super::types::{AdminState, GeoIpStatus, LockoutStatus, RulesStatus, StatusResponse};

/// JSON status endpoint: snapshot, rules, lockouts and decision counters
pub async fn status_handler(State(state): State<AdminState>) -> Response {
    let engine = &state.engine;
    let rules = engine.rules();
    let tracker = engine.tracker();
    let now = Utc::now();

    let geoip = engine.resolver().metadata().map(|metadata| GeoIpStatus {
        age_seconds: metadata.last_updated.elapsed().ok().map(|age| age.as_secs()),
        version: metadata.version,
        source: metadata.source,
        source_checksum: metadata.source_checksum,
    });

    let response = StatusResponse {
        uptime_seconds: state.start_time.elapsed().as_secs_f64(),
        geoip,
        rules: RulesStatus {
            count: rules.len(),
            default_policy: rules.default_policy(),
        },
        lockout: LockoutStatus {
            enabled: engine.config().lockout_enabled && tracker.config().is_enabled(),
            threshold: tracker.config().threshold,
            tracked_keys: tracker.snapshot_at(now).await.len(),
            locked_keys: tracker.locked_count_at(now).await,
        },
        decisions: engine
            .stats()
            .snapshot()
            .into_iter()
            .map(|(event, count)| (event.as_str(), count))
            .collect(),
    };

    (StatusCode::OK, Json(response)).into_response()
}
