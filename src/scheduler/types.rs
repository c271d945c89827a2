//! Scheduler types.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{Config, MAX_NETWORK_DOWNLOAD_RETRIES};
use crate::geoip::GeoIpMetadata;

/// Refresh parameters.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Directory holding snapshot files and `metadata.json`
    pub cache_dir: PathBuf,
    /// Per-request download timeout
    pub download_timeout: Duration,
    /// How long a superseded snapshot file is kept after a swap
    pub grace_period: Duration,
}

impl RefreshConfig {
    /// Upper bound for fetching one candidate, retries included.
    pub fn fetch_deadline(&self) -> Duration {
        self.download_timeout
            .saturating_mul(MAX_NETWORK_DOWNLOAD_RETRIES)
            .saturating_add(backoff_total())
    }
}

impl From<&Config> for RefreshConfig {
    fn from(config: &Config) -> Self {
        RefreshConfig {
            cache_dir: config.cache_dir.clone(),
            download_timeout: config.download_timeout,
            grace_period: config.grace_period,
        }
    }
}

/// Total sleep between download attempts (2s, 4s, ...).
fn backoff_total() -> Duration {
    let secs: u64 = (1..MAX_NETWORK_DOWNLOAD_RETRIES).map(|attempt| 2u64 << (attempt - 1)).sum();
    Duration::from_secs(secs)
}

/// Result of a successful refresh.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", content = "metadata", rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// A new snapshot was published
    Updated(GeoIpMetadata),
    /// The source still serves the active snapshot; nothing changed
    Unchanged,
}
