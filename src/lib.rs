//! access_guard library: access decisions for administrative logins
//!
//! Decides whether a request to a protected area should be allowed,
//! challenged or blocked, based on:
//! - the country of the source IP (GeoIP snapshot, refreshed in the background)
//! - IP/CIDR and country restriction rules
//! - brute-force lockout state for the account and the source IP
//!
//! # Example
//!
//! ```no_run
//! use access_guard::{AccessDecision, AccessGuard, Config};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config {
//!     geoip_source: Some("/var/lib/geoip/GeoLite2-Country.mmdb".to_string()),
//!     rules_file: Some("rules.json".into()),
//!     auto_update: false,
//!     ..Default::default()
//! };
//!
//! let guard = AccessGuard::build(config).await?;
//! guard.load_snapshot().await;
//!
//! let ip = "203.0.113.7".parse()?;
//! let verdict = guard.engine.evaluate_request(ip, Some("admin")).await;
//! if verdict.decision == AccessDecision::Deny {
//!     println!("blocked: {:?}", verdict.reasons);
//! }
//! guard.engine.record_authentication(ip, Some("admin"), false).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Requirements
//!
//! This library requires a Tokio runtime. Use `#[tokio::main]` in your application
//! or ensure you're calling library functions within an async context.

#![warn(missing_docs)]

pub mod admin_server;
pub mod config;
pub mod engine;
pub mod error_handling;
pub mod geoip;
mod guard;
pub mod initialization;
pub mod lockout;
pub mod rules;
pub mod scheduler;

// Re-export public API
pub use config::{Config, LogFormat, LogLevel};
pub use engine::{AccessDecision, AccessEngine, AccessVerdict};
pub use error_handling::AccessError;
pub use geoip::{CountryCode, GeoIpResolver};
pub use guard::AccessGuard;
pub use lockout::{LockoutState, LockoutTracker};
pub use rules::{RuleAction, RuleStore};
pub use scheduler::{RefreshOutcome, RefreshScheduler};
