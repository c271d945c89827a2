//! Prometheus metrics handler.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt::Write;

use super::super::types::AdminState;

/// Prometheus-compatible metrics endpoint
pub async fn metrics_handler(State(state): State<AdminState>) -> Response {
    let engine = &state.engine;
    let snapshot_loaded = u8::from(engine.resolver().is_loaded());
    let rule_count = engine.rules().len();
    let locked = engine.tracker().locked_count().await;

    let mut metrics = format!(
        "# HELP access_guard_uptime_seconds Time since the engine started\n\
         # TYPE access_guard_uptime_seconds gauge\n\
         access_guard_uptime_seconds {:.3}\n\
         # HELP access_guard_geoip_loaded Whether a GeoIP snapshot is active\n\
         # TYPE access_guard_geoip_loaded gauge\n\
         access_guard_geoip_loaded {}\n\
         # HELP access_guard_rules Number of compiled restriction rules\n\
         # TYPE access_guard_rules gauge\n\
         access_guard_rules {}\n\
         # HELP access_guard_locked_keys Keys currently locked out\n\
         # TYPE access_guard_locked_keys gauge\n\
         access_guard_locked_keys {}\n",
        state.start_time.elapsed().as_secs_f64(),
        snapshot_loaded,
        rule_count,
        locked,
    );

    for (event, count) in engine.stats().snapshot() {
        let name = event.as_str();
        // Writing to a String cannot fail
        let _ = write!(
            metrics,
            "# HELP access_guard_{name}_total Count of {name} events\n\
             # TYPE access_guard_{name}_total counter\n\
             access_guard_{name}_total {count}\n"
        );
    }

    (StatusCode::OK, metrics).into_response()
}
