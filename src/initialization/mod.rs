//! Application initialization and resource setup.
//!
//! Logger, download HTTP client and the lockout database pool. All
//! initialization functions return typed errors.

mod client;
mod database;
mod logger;

// Re-export public API
pub use client::init_download_client;
pub use database::{init_db_pool_with_path, run_migrations};
pub use logger::init_logger_with;

#[cfg(test)]
pub(crate) use database::create_test_pool;
