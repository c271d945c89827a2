//! Configuration types and CLI options.
//!
//! This module defines the library configuration struct, the logging enums and
//! the command-line options that are converted into a [`Config`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::constants::{
    DEFAULT_ADMIN_PORT, DEFAULT_CACHE_DIR, DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_GEOIP_EDITION,
    DEFAULT_GRACE_PERIOD, DEFAULT_LOCKOUT_DURATION, DEFAULT_LOCKOUT_THRESHOLD,
    DEFAULT_LOCKOUT_WINDOW, DEFAULT_REFRESH_INTERVAL, MAXMIND_LICENSE_KEY_ENV,
};
use crate::error_handling::ConfigError;
use crate::lockout::LockoutConfig;
use crate::rules::RuleAction;

/// Logging level for the application.
///
/// Controls the verbosity of log output, from most restrictive (Error) to most
/// verbose (Trace).
#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    /// Only error messages
    Error,
    /// Error and warning messages
    Warn,
    /// Error, warning, and informational messages
    Info,
    /// All messages except trace
    Debug,
    /// All messages including trace
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Log output format.
///
/// - `Plain`: Human-readable format with colors (default)
/// - `Json`: Structured JSON format for machine parsing
#[derive(Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    Plain,
    /// Structured JSON format for machine parsing
    Json,
}

/// Credential used to authorize GeoIP database downloads.
///
/// The value is only reachable through [`LicenseKey::expose`]; `Debug` and
/// `Display` are redacted so the key never ends up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct LicenseKey(String);

impl LicenseKey {
    /// Wraps a raw key. Returns `None` for empty or whitespace-only input.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(LicenseKey(trimmed.to_string()))
        }
    }

    /// Returns the raw key. Only the download URL builder should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for LicenseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LicenseKey(<redacted>)")
    }
}

impl fmt::Display for LicenseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Library configuration (no CLI dependencies).
///
/// Built once and handed to each component at construction time. Components
/// never consult a global configuration store; the scheduler re-reads the
/// rules file on its ticks and nothing else changes at runtime.
///
/// # Examples
///
/// ```no_run
/// use access_guard::Config;
/// use std::path::PathBuf;
///
/// let config = Config {
///     rules_file: Some(PathBuf::from("rules.json")),
///     geoip_source: Some("/var/lib/geoip/GeoLite2-Country.mmdb".to_string()),
///     ..Default::default()
/// };
/// config.validate().expect("valid configuration");
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Log level
    pub log_level: LogLevel,

    /// Log format
    pub log_format: LogFormat,

    /// Enable IP/GeoIP restriction rules
    pub restriction_enabled: bool,

    /// Enable brute-force lockout
    pub lockout_enabled: bool,

    /// Decision when no rule matches
    pub default_policy: RuleAction,

    /// Allow requests when no GeoIP snapshot is loaded (deny otherwise)
    pub geoip_fail_open: bool,

    /// JSON rules file
    pub rules_file: Option<PathBuf>,

    /// GeoIP snapshot source: local file path or download URL.
    /// If `None` and a license key is set, the MaxMind edition is downloaded.
    pub geoip_source: Option<String>,

    /// MaxMind license key
    pub license_key: Option<LicenseKey>,

    /// MaxMind edition to download
    pub geoip_edition: String,

    /// Directory holding the active snapshot and its metadata
    pub cache_dir: PathBuf,

    /// Run the periodic refresh task
    pub auto_update: bool,

    /// Interval between refresh ticks
    pub refresh_interval: Duration,

    /// Upper bound for one snapshot fetch
    pub download_timeout: Duration,

    /// How long a superseded snapshot file is kept
    pub grace_period: Duration,

    /// Lockout threshold, window and duration
    pub lockout: LockoutConfig,

    /// SQLite file for persisted lockout records (in-memory only if `None`)
    pub lockout_db_path: Option<PathBuf>,

    /// Admin HTTP server port (disabled if `None`)
    pub admin_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_format: LogFormat::Plain,
            restriction_enabled: true,
            lockout_enabled: true,
            default_policy: RuleAction::Allow,
            geoip_fail_open: true,
            rules_file: None,
            geoip_source: None,
            license_key: None,
            geoip_edition: DEFAULT_GEOIP_EDITION.to_string(),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            auto_update: true,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
            lockout: LockoutConfig::default(),
            lockout_db_path: None,
            admin_port: None,
        }
    }
}

impl Config {
    /// Checks the configuration for values the components cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "refresh interval must be greater than zero".to_string(),
            ));
        }
        if self.download_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "download timeout must be greater than zero".to_string(),
            ));
        }
        if self.lockout.threshold > 0
            && (self.lockout.window.is_zero() || self.lockout.duration.is_zero())
        {
            return Err(ConfigError::Invalid(
                "lockout window and duration must be greater than zero when the threshold is set"
                    .to_string(),
            ));
        }
        if self.auto_update && self.restriction_enabled && !self.has_geoip_source() {
            return Err(ConfigError::Invalid(
                "auto-update needs a GeoIP source or a license key".to_string(),
            ));
        }
        if self.geoip_edition.trim().is_empty() {
            return Err(ConfigError::Invalid("GeoIP edition is empty".to_string()));
        }
        Ok(())
    }

    /// Whether any GeoIP source (path, URL or license key) is configured.
    pub fn has_geoip_source(&self) -> bool {
        self.geoip_source.is_some() || self.license_key.is_some()
    }
}

/// Command-line options.
///
/// # Examples
///
/// ```bash
/// # Serve with a MaxMind license key from the environment
/// MAXMIND_LICENSE_KEY=... access_guard serve --rules rules.json --admin-port 8089
///
/// # One-off decision
/// access_guard check 203.0.113.7 --account admin --geoip ./GeoLite2-Country.mmdb
///
/// # Manual refresh
/// access_guard refresh
/// ```
#[derive(Debug, Parser)]
#[command(
    name = "access_guard",
    about = "Decides whether admin requests are allowed, challenged or blocked."
)]
pub struct Opt {
    /// Log level: error|warn|info|debug|trace
    #[arg(long, value_enum, default_value_t = LogLevel::Info, global = true)]
    pub log_level: LogLevel,

    /// Log format: plain|json
    #[arg(long, value_enum, default_value_t = LogFormat::Plain, global = true)]
    pub log_format: LogFormat,

    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the refresh scheduler and the admin server until interrupted
    Serve {
        /// Admin HTTP server port (127.0.0.1 only)
        #[arg(long, default_value_t = DEFAULT_ADMIN_PORT)]
        admin_port: u16,

        /// Disable the periodic GeoIP refresh
        #[arg(long)]
        no_auto_update: bool,
    },
    /// Evaluate a single request and print the verdict
    Check {
        /// Source IP address
        ip: String,

        /// Account attempting to authenticate
        #[arg(long)]
        account: Option<String>,
    },
    /// Refresh the GeoIP snapshot once and exit
    Refresh,
}

/// Options shared by all subcommands.
#[derive(Debug, Args)]
pub struct EngineArgs {
    /// Rules file (JSON)
    #[arg(long = "rules", global = true)]
    pub rules_file: Option<PathBuf>,

    /// GeoIP snapshot path or download URL
    /// Examples:
    ///   --geoip /path/to/GeoLite2-Country.mmdb
    ///   --geoip /path/to/ranges.csv
    /// If not provided, the MaxMind edition is downloaded when MAXMIND_LICENSE_KEY is set.
    #[arg(long = "geoip", global = true)]
    pub geoip_source: Option<String>,

    /// MaxMind license key
    #[arg(long, env = MAXMIND_LICENSE_KEY_ENV, hide_env_values = true, global = true)]
    pub license_key: Option<String>,

    /// MaxMind edition to download
    #[arg(long, default_value = DEFAULT_GEOIP_EDITION, global = true)]
    pub geoip_edition: String,

    /// Snapshot cache directory
    #[arg(long, default_value = DEFAULT_CACHE_DIR, global = true)]
    pub cache_dir: PathBuf,

    /// Deny requests that match no rule
    #[arg(long, global = true)]
    pub default_deny: bool,

    /// Deny requests while no GeoIP snapshot is loaded
    #[arg(long, global = true)]
    pub fail_closed: bool,

    /// Failed attempts before lockout (0 disables lockout)
    #[arg(long, default_value_t = DEFAULT_LOCKOUT_THRESHOLD, global = true)]
    pub lockout_threshold: u32,

    /// Lockout counting window in seconds
    #[arg(long, default_value_t = DEFAULT_LOCKOUT_WINDOW.as_secs(), global = true)]
    pub lockout_window_secs: u64,

    /// Lockout duration in seconds
    #[arg(long, default_value_t = DEFAULT_LOCKOUT_DURATION.as_secs(), global = true)]
    pub lockout_duration_secs: u64,

    /// SQLite file for persisted lockout records
    #[arg(long, global = true)]
    pub lockout_db: Option<PathBuf>,

    /// Refresh interval in seconds
    #[arg(long, default_value_t = DEFAULT_REFRESH_INTERVAL.as_secs(), global = true)]
    pub refresh_interval_secs: u64,

    /// Download timeout in seconds
    #[arg(long, default_value_t = DEFAULT_DOWNLOAD_TIMEOUT.as_secs(), global = true)]
    pub download_timeout_secs: u64,

    /// Seconds a superseded snapshot is kept before deletion
    #[arg(long, default_value_t = DEFAULT_GRACE_PERIOD.as_secs(), global = true)]
    pub grace_period_secs: u64,
}

impl From<Opt> for Config {
    fn from(opt: Opt) -> Self {
        let args = opt.engine;
        let (admin_port, auto_update) = match opt.command {
            Command::Serve {
                admin_port,
                no_auto_update,
            } => (Some(admin_port), !no_auto_update),
            Command::Check { .. } | Command::Refresh => (None, false),
        };

        let mut config = Config {
            log_level: opt.log_level,
            log_format: opt.log_format,
            default_policy: if args.default_deny {
                RuleAction::Deny
            } else {
                RuleAction::Allow
            },
            geoip_fail_open: !args.fail_closed,
            rules_file: args.rules_file,
            geoip_source: args.geoip_source,
            license_key: args.license_key.and_then(LicenseKey::new),
            geoip_edition: args.geoip_edition,
            cache_dir: args.cache_dir,
            auto_update,
            refresh_interval: Duration::from_secs(args.refresh_interval_secs),
            download_timeout: Duration::from_secs(args.download_timeout_secs),
            grace_period: Duration::from_secs(args.grace_period_secs),
            lockout: LockoutConfig {
                threshold: args.lockout_threshold,
                window: Duration::from_secs(args.lockout_window_secs),
                duration: Duration::from_secs(args.lockout_duration_secs),
            },
            lockout_db_path: args.lockout_db,
            admin_port,
            ..Default::default()
        };
        config.lockout_enabled = config.lockout.threshold > 0;
        config
    }
}
