//! GeoIP resolution.
//!
//! Maps IP addresses to ISO country codes using a locally loaded snapshot.
//! Snapshots are either MaxMind databases (`.mmdb`, optionally delivered as
//! `.tar.gz`) or plain range tables of `network,country` lines. The
//! [`GeoIpResolver`] owns the active snapshot; the refresh scheduler only
//! hands it a fully validated replacement.

mod extract;
pub(crate) mod metadata;
mod resolver;
mod snapshot;
mod source;
mod table;
mod types;

// Re-export public API
pub use resolver::GeoIpResolver;
pub use snapshot::{load_from_file, GeoIpSnapshot, LoadedSnapshot};
pub use source::{FetchedSnapshot, SnapshotSource};
pub use table::RangeTable;
pub use types::{CountryCode, GeoIpMetadata, Resolution};

pub(crate) use extract::{extract_database_from_tar_gz, is_gzip};
pub(crate) use source::redirect_policy;

#[cfg(test)]
pub(crate) use extract::tests::create_test_tar_gz;
