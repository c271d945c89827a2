//! Loopback HTTP server for operators.
//!
//! Endpoints:
//! - `GET /status` - JSON view of the snapshot, rules, lockouts and counters
//! - `GET /metrics` - Prometheus-compatible metrics
//! - `POST /geoip/refresh` - run one refresh now
//! - `DELETE /lockout/:key` - clear a lockout (`account:<name>` or `ip:<addr>`)
//!
//! The server binds 127.0.0.1 only and runs alongside the scheduler.

mod handlers;
mod types;

use axum::routing::{delete, get, post};
use axum::Router;

use handlers::{metrics_handler, refresh_handler, status_handler, unlock_handler};
pub use types::AdminState;

/// Builds the admin router.
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/status", get(status_handler))
        .route("/geoip/refresh", post(refresh_handler))
        .route("/lockout/:key", delete(unlock_handler))
        .with_state(state)
}

/// Creates and starts the admin server
pub async fn start_admin_server(port: u16, state: AdminState) -> Result<(), anyhow::Error> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind admin server to port {}: {}", port, e))?;

    log::info!("Admin server listening on http://127.0.0.1:{}/", port);
    log::info!("  - Status: http://127.0.0.1:{}/status", port);
    log::info!("  - Metrics: http://127.0.0.1:{}/metrics", port);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Admin server error: {}", e))?;

    Ok(())
}
