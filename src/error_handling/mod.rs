//! Error handling and decision statistics.
//!
//! This module provides:
//! - The access-control error taxonomy ([`AccessError`])
//! - Setup errors (configuration, logger, lockout database)
//! - Decision statistics tracking
//!
//! Failure kinds map onto degraded behaviour rather than crashes:
//! - **DatabaseUnavailable**: fail open (default) or closed
//! - **InvalidRuleConfig**: rule skipped, evaluation continues
//! - **RefreshFailed**: previous snapshot retained, retried next tick
//! - **LockoutExceeded**: attempt rejected

mod stats;
mod types;

// Re-export public API
pub use stats::DecisionStats;
pub use types::{AccessError, ConfigError, DatabaseError, DecisionEvent, InitializationError};
