//! Lockout state types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::config::{DEFAULT_LOCKOUT_DURATION, DEFAULT_LOCKOUT_THRESHOLD, DEFAULT_LOCKOUT_WINDOW};

/// Lockout parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutConfig {
    /// Failures within `window` that lock the identity. `0` disables lockout.
    pub threshold: u32,
    /// Span over which failures are counted, starting at the first failure
    pub window: Duration,
    /// How long a locked identity stays locked
    pub duration: Duration,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        LockoutConfig {
            threshold: DEFAULT_LOCKOUT_THRESHOLD,
            window: DEFAULT_LOCKOUT_WINDOW,
            duration: DEFAULT_LOCKOUT_DURATION,
        }
    }
}

impl LockoutConfig {
    /// Whether lockout is active at all.
    pub fn is_enabled(&self) -> bool {
        self.threshold > 0
    }
}

/// Observable state of one identity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LockoutState {
    /// No failures on record
    Clear,
    /// Failures recorded, below the threshold
    Warning {
        /// Failures in the current window
        failures: u32,
        /// Failures left before lockout
        remaining: u32,
    },
    /// Threshold reached; attempts are rejected until `locked_until`
    Locked {
        /// Failures that triggered the lock
        failures: u32,
        /// End of the lockout
        locked_until: DateTime<Utc>,
    },
}

impl LockoutState {
    /// Whether the key is locked.
    pub fn is_locked(&self) -> bool {
        matches!(self, LockoutState::Locked { .. })
    }

    /// Severity rank used to combine the states of several keys.
    pub(crate) fn severity(&self) -> u8 {
        match self {
            LockoutState::Clear => 0,
            LockoutState::Warning { .. } => 1,
            LockoutState::Locked { .. } => 2,
        }
    }
}

/// Failure bookkeeping for one identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockoutRecord {
    /// `account:<name>` or `ip:<addr>`
    pub key: String,
    /// Failures in the current window
    pub failure_count: u32,
    /// First failure of the current window
    pub window_start: DateTime<Utc>,
    /// Set once the threshold is reached
    pub locked_until: Option<DateTime<Utc>>,
}

impl LockoutRecord {
    /// Whether the record no longer carries any state at `now`.
    ///
    /// A locked record expires when the lock ends. An unlocked one expires
    /// when its counting window has elapsed.
    pub fn is_expired(&self, config: &LockoutConfig, now: DateTime<Utc>) -> bool {
        match self.locked_until {
            Some(until) => now >= until,
            None => now >= saturating_add(self.window_start, config.window),
        }
    }

    /// State this record represents at `now`.
    pub fn state(&self, config: &LockoutConfig, now: DateTime<Utc>) -> LockoutState {
        if self.is_expired(config, now) {
            return LockoutState::Clear;
        }
        match self.locked_until {
            Some(locked_until) => LockoutState::Locked {
                failures: self.failure_count,
                locked_until,
            },
            None => LockoutState::Warning {
                failures: self.failure_count,
                remaining: config.threshold.saturating_sub(self.failure_count),
            },
        }
    }
}

/// Key for an account name.
pub fn account_key(account: &str) -> String {
    format!("account:{}", account.trim().to_lowercase())
}

/// Key for a source address.
pub fn ip_key(ip: std::net::IpAddr) -> String {
    format!("ip:{}", ip.to_canonical())
}

/// Canonical form of a tracked key given as `account:<name>` or `ip:<addr>`.
///
/// Returns `None` for any other prefix or an unparseable address.
pub fn normalize_key(key: &str) -> Option<String> {
    if let Some(account) = key.strip_prefix("account:") {
        return Some(account_key(account));
    }
    key.strip_prefix("ip:")
        .and_then(|ip| ip.trim().parse().ok())
        .map(ip_key)
}

/// `time + duration`, clamped to the largest representable instant.
pub(crate) fn saturating_add(time: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| time.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
