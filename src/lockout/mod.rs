//! Brute-force lockout.
//!
//! Counts failed authentication attempts per identity key (account or source
//! address) within a window that opens at the first failure. Reaching the
//! threshold locks the key for a fixed duration; a successful authentication
//! clears it. Records can be mirrored to SQLite so locks survive restarts.

mod store;
mod tracker;
mod types;

pub use store::LockoutStore;
pub use tracker::LockoutTracker;
pub use types::{
    account_key, ip_key, normalize_key, LockoutConfig, LockoutRecord, LockoutState,
};
