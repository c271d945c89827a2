//! Configuration constants.
//!
//! This module defines the constants used throughout the engine, including
//! download limits, refresh cadence and lockout defaults.

use std::time::Duration;

/// Default cache directory for GeoIP snapshots
pub const DEFAULT_CACHE_DIR: &str = ".geoip_cache";

/// Metadata file stored next to the active snapshot
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Environment variable name for the MaxMind license key
pub const MAXMIND_LICENSE_KEY_ENV: &str = "MAXMIND_LICENSE_KEY";

/// MaxMind download base URL
pub const MAXMIND_DOWNLOAD_BASE: &str = "https://download.maxmind.com/app/geoip_download";

/// Default MaxMind edition (country-level data is all the rules need)
pub const DEFAULT_GEOIP_EDITION: &str = "GeoLite2-Country";

/// Maximum GeoIP download size in bytes (200MB)
/// City editions are ~70MB compressed; anything larger is treated as hostile
pub const MAX_GEOIP_DOWNLOAD_SIZE: usize = 200 * 1024 * 1024;

/// Maximum size of a database file extracted from an archive (512MB)
pub const MAX_GEOIP_EXTRACTED_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of download attempts per refresh (including the first)
pub const MAX_NETWORK_DOWNLOAD_RETRIES: u32 = 3;

/// Default refresh interval (daily)
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default timeout for a whole snapshot fetch
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// How long a superseded snapshot file is kept before deletion
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);

// Lockout defaults
/// Failed attempts before an identity is locked
pub const DEFAULT_LOCKOUT_THRESHOLD: u32 = 5;
/// Window over which failures are counted
pub const DEFAULT_LOCKOUT_WINDOW: Duration = Duration::from_secs(15 * 60);
/// How long a locked identity stays locked
pub const DEFAULT_LOCKOUT_DURATION: Duration = Duration::from_secs(15 * 60);

/// Default admin server port
pub const DEFAULT_ADMIN_PORT: u16 = 8089;
