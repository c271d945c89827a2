//! Error type definitions.
//!
//! This module defines the access-control error taxonomy, the setup errors
//! and the event kinds counted by [`super::DecisionStats`].

use chrono::{DateTime, Utc};
use log::SetLoggerError;
use strum_macros::EnumIter as EnumIterMacro;
use thiserror::Error;

/// Failures of the access decision engine.
///
/// None of these are fatal to the host process: each one degrades to the
/// last-known-good state (previous snapshot, remaining rules, in-memory
/// lockout records).
#[derive(Error, Debug)]
pub enum AccessError {
    /// No GeoIP snapshot is loaded. The engine fails open or closed per policy.
    #[error("GeoIP database unavailable: no snapshot loaded")]
    DatabaseUnavailable,

    /// A rule could not be compiled and was skipped.
    #[error("Invalid rule '{rule_id}': {reason}")]
    InvalidRuleConfig {
        /// Identifier of the skipped rule
        rule_id: String,
        /// Why the rule was rejected
        reason: String,
    },

    /// A scheduled or manual refresh failed; the previous snapshot is retained.
    #[error("GeoIP refresh failed: {0:#}")]
    RefreshFailed(#[from] anyhow::Error),

    /// The identity is locked out; the attempt was rejected.
    #[error("Too many failed attempts for '{key}', locked until {locked_until}")]
    LockoutExceeded {
        /// Lockout key (`account:<name>` or `ip:<addr>`)
        key: String,
        /// End of the lockout
        locked_until: DateTime<Utc>,
    },
}

impl AccessError {
    /// Short machine-readable kind, used in audit log lines and the admin API.
    pub fn kind(&self) -> &'static str {
        match self {
            AccessError::DatabaseUnavailable => "database_unavailable",
            AccessError::InvalidRuleConfig { .. } => "invalid_rule_config",
            AccessError::RefreshFailed(_) => "refresh_failed",
            AccessError::LockoutExceeded { .. } => "lockout_exceeded",
        }
    }
}

/// Error types for configuration validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration value is out of range or inconsistent.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Error types for initialization failures.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)] // All variants end with "Error" by convention
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),

    /// Error building the download HTTP client.
    #[error("HTTP client initialization error: {0}")]
    HttpClientError(#[from] reqwest::Error),

    /// Invalid configuration detected at startup.
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),
}

/// Error types for lockout persistence.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error creating the database file.
    #[error("Database file creation error: {0}")]
    FileCreationError(String),

    /// SQL execution error.
    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),

    /// Migration error.
    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
}

/// Events counted by the decision statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIterMacro)]
pub enum DecisionEvent {
    /// Request allowed
    Allowed,
    /// Request challenged (lockout warning)
    Challenged,
    /// Request denied
    Denied,
    /// A restriction rule or the default policy denied the request
    RuleDenied,
    /// An active lockout rejected the request
    LockoutRejected,
    /// No GeoIP snapshot was available for a lookup
    GeoIpUnavailable,
    /// Failed authentication recorded
    AuthFailure,
    /// Successful authentication recorded
    AuthSuccess,
    /// Rule dropped at compile time
    InvalidRuleSkipped,
    /// New snapshot installed
    RefreshSucceeded,
    /// Source content unchanged
    RefreshUnchanged,
    /// Refresh attempt failed; previous snapshot kept
    RefreshFailed,
}

impl std::fmt::Display for DecisionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DecisionEvent {
    /// Snake-case name used for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionEvent::Allowed => "allowed",
            DecisionEvent::Challenged => "challenged",
            DecisionEvent::Denied => "denied",
            DecisionEvent::RuleDenied => "rule_denied",
            DecisionEvent::LockoutRejected => "lockout_rejected",
            DecisionEvent::GeoIpUnavailable => "geoip_unavailable",
            DecisionEvent::AuthFailure => "auth_failure",
            DecisionEvent::AuthSuccess => "auth_success",
            DecisionEvent::InvalidRuleSkipped => "invalid_rule_skipped",
            DecisionEvent::RefreshSucceeded => "refresh_succeeded",
            DecisionEvent::RefreshUnchanged => "refresh_unchanged",
            DecisionEvent::RefreshFailed => "refresh_failed",
        }
    }
}
