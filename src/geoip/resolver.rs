//! GeoIP resolver.
//!
//! Holds the active snapshot behind a lock that is only ever held long enough
//! to clone or replace an `Arc`. A lookup clones the `Arc` first and then reads
//! without any lock, so a concurrent swap can never expose a partially
//! replaced snapshot.

use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};

use super::snapshot::LoadedSnapshot;
use super::types::{GeoIpMetadata, Resolution};
use crate::error_handling::AccessError;

/// Maps IP addresses to country codes using the active snapshot.
#[derive(Debug, Default)]
pub struct GeoIpResolver {
    current: RwLock<Option<Arc<LoadedSnapshot>>>,
}

impl GeoIpResolver {
    /// Creates a resolver with no snapshot loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a resolver that starts with `snapshot`.
    pub fn with_snapshot(snapshot: LoadedSnapshot) -> Self {
        GeoIpResolver {
            current: RwLock::new(Some(Arc::new(snapshot))),
        }
    }

    /// Resolves an address to a country.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::DatabaseUnavailable`] when no snapshot is loaded.
    pub fn resolve(&self, ip: IpAddr) -> Result<Resolution, AccessError> {
        let snapshot = self.current().ok_or(AccessError::DatabaseUnavailable)?;
        Ok(snapshot.snapshot.lookup(ip))
    }

    /// Resolves a textual address. Unparsable input resolves to `Unknown`.
    pub fn resolve_str(&self, ip: &str) -> Result<Resolution, AccessError> {
        let snapshot = self.current().ok_or(AccessError::DatabaseUnavailable)?;
        Ok(match ip.trim().parse::<IpAddr>() {
            Ok(addr) => snapshot.snapshot.lookup(addr),
            Err(_) => Resolution::Unknown,
        })
    }

    /// The active snapshot, if any.
    pub fn current(&self) -> Option<Arc<LoadedSnapshot>> {
        // The guarded value is a single Option<Arc>, replaced in one
        // assignment, so it is consistent even if a writer panicked.
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Metadata of the active snapshot.
    pub fn metadata(&self) -> Option<GeoIpMetadata> {
        self.current().map(|loaded| loaded.metadata.clone())
    }

    /// Whether a snapshot is loaded.
    pub fn is_loaded(&self) -> bool {
        self.current().is_some()
    }

    /// Publishes a new snapshot and returns the one it replaced.
    pub fn install(&self, snapshot: LoadedSnapshot) -> Option<Arc<LoadedSnapshot>> {
        let next = Arc::new(snapshot);
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        guard.replace(next)
    }
}
