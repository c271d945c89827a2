//! GeoIP database refresh scheduling.
//!
//! Runs out-of-band from request evaluation: readers keep using the current
//! snapshot while a candidate is fetched and validated, and only observe the
//! new one after an atomic swap.

mod refresh;
mod types;

pub use refresh::RefreshScheduler;
pub use types::{RefreshConfig, RefreshOutcome};
