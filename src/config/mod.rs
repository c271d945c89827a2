//! Application configuration and constants.
//!
//! This module provides:
//! - Configuration constants (limits, intervals, lockout defaults)
//! - The library [`Config`] struct and CLI option types
//! - Rules file loading

mod constants;
mod rules_file;
mod types;

// Re-export all constants
pub use constants::*;
pub use rules_file::{load_rules_file, RulesFile};
pub use types::{Command, Config, EngineArgs, LicenseKey, LogFormat, LogLevel, Opt};
