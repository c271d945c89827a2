//! Restriction rules.
//!
//! Allow/deny rules keyed on IP ranges and country codes, evaluated
//! first-match-wins in priority order, with a configurable default policy.

mod store;
mod types;

pub use store::RuleStore;
pub use types::{IpRangeRule, RuleAction, RuleConfig, RuleVerdict};
