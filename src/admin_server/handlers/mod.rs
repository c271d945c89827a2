//! Admin server HTTP handlers.

mod lockout;
mod metrics;
mod refresh;
mod status;

pub use lockout::unlock_handler;
pub use metrics::metrics_handler;
pub use refresh::refresh_handler;
pub use status::status_handler;
