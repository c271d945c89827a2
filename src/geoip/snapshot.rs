//! Loaded GeoIP snapshots.
//!
//! A snapshot is immutable once built. The resolver hands out `Arc`s to it, so
//! a refresh never mutates data a reader is looking at.

use anyhow::{Context, Result};
use maxminddb::Reader;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::SystemTime;

use super::metadata::sha256_hex;
use super::table::RangeTable;
use super::types::{CountryCode, GeoIpMetadata, Resolution};

/// Marker that starts the metadata section of every MaxMind DB file.
const MMDB_METADATA_MARKER: &[u8] = b"\xab\xcd\xefMaxMind.com";

/// Metadata lives in the last 128KiB of an MMDB file.
const MMDB_METADATA_MAX_SIZE: usize = 128 * 1024;

/// Backing data of a snapshot.
pub enum GeoIpSnapshot {
    /// MaxMind DB (trie lookup)
    Mmdb(Reader<Vec<u8>>),
    /// Range table (binary search)
    RangeTable(RangeTable),
}

impl std::fmt::Debug for GeoIpSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeoIpSnapshot::Mmdb(reader) => f
                .debug_struct("Mmdb")
                .field("build_epoch", &reader.metadata.build_epoch)
                .field("database_type", &reader.metadata.database_type)
                .finish(),
            GeoIpSnapshot::RangeTable(table) => f
                .debug_struct("RangeTable")
                .field("entries", &table.len())
                .field("version", &table.version())
                .finish(),
        }
    }
}

impl GeoIpSnapshot {
    /// Builds a snapshot from raw database bytes, detecting the format.
    ///
    /// This is the trial load: any error means the candidate must not be
    /// published.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if looks_like_mmdb(&bytes) {
            let reader =
                Reader::from_source(bytes).with_context(|| "Failed to parse MaxMind database")?;
            // A trial lookup walks the search tree and catches truncated files
            // whose metadata section happens to survive.
            reader
                .lookup(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)))
                .with_context(|| "MaxMind database failed trial lookup")?;
            Ok(GeoIpSnapshot::Mmdb(reader))
        } else {
            let text = std::str::from_utf8(&bytes)
                .with_context(|| "GeoIP snapshot is neither a MaxMind database nor UTF-8 text")?;
            let table = RangeTable::parse(text).with_context(|| "Failed to parse range table")?;
            Ok(GeoIpSnapshot::RangeTable(table))
        }
    }

    /// Looks up the country of an address.
    pub fn lookup(&self, ip: IpAddr) -> Resolution {
        match self {
            GeoIpSnapshot::Mmdb(reader) => lookup_mmdb(reader, ip),
            GeoIpSnapshot::RangeTable(table) => match table.lookup(ip) {
                Some(code) => Resolution::Country(code.clone()),
                None => Resolution::Unknown,
            },
        }
    }

    /// Build identifier of the data, if the format carries one.
    pub fn build_version(&self) -> Option<String> {
        match self {
            GeoIpSnapshot::Mmdb(reader) => Some(format!("build_{}", reader.metadata.build_epoch)),
            GeoIpSnapshot::RangeTable(table) => table.version().map(|v| v.to_string()),
        }
    }
}

fn looks_like_mmdb(bytes: &[u8]) -> bool {
    let tail_start = bytes.len().saturating_sub(MMDB_METADATA_MAX_SIZE);
    bytes[tail_start..]
        .windows(MMDB_METADATA_MARKER.len())
        .any(|window| window == MMDB_METADATA_MARKER)
}

fn lookup_mmdb(reader: &Reader<Vec<u8>>, ip: IpAddr) -> Resolution {
    // maxminddb 0.27 API: lookup() returns Result<LookupResult, MaxMindDbError>
    let lookup = match reader.lookup(ip) {
        Ok(result) => result,
        Err(e) => {
            log::debug!("GeoIP lookup failed for {}: {}", ip, e);
            return Resolution::Unknown;
        }
    };

    if !lookup.has_data() {
        return Resolution::Unknown;
    }

    let country: maxminddb::geoip2::Country = match lookup.decode() {
        Ok(Some(country)) => country,
        Ok(None) => return Resolution::Unknown,
        Err(e) => {
            log::debug!("GeoIP decode failed for {}: {}", ip, e);
            return Resolution::Unknown;
        }
    };

    country
        .country
        .iso_code
        .and_then(|code| CountryCode::parse(code).ok())
        .map(Resolution::Country)
        .unwrap_or(Resolution::Unknown)
}

/// A snapshot together with its metadata. This is what the resolver swaps.
#[derive(Debug)]
pub struct LoadedSnapshot {
    /// Lookup data
    pub snapshot: GeoIpSnapshot,
    /// Where the data came from and which version it is
    pub metadata: GeoIpMetadata,
}

impl LoadedSnapshot {
    /// Trial-loads raw bytes and attaches metadata.
    ///
    /// `source_checksum` is the checksum of what the source delivered (the
    /// archive for vendor downloads); when `None` the checksum of `bytes`
    /// is used.
    pub fn from_bytes(
        bytes: Vec<u8>,
        source: &str,
        source_checksum: Option<String>,
    ) -> Result<Self> {
        let checksum = source_checksum.unwrap_or_else(|| sha256_hex(&bytes));
        let snapshot = GeoIpSnapshot::from_bytes(bytes)?;
        let version = snapshot
            .build_version()
            .unwrap_or_else(|| format!("sha256_{}", &checksum[..checksum.len().min(12)]));

        Ok(LoadedSnapshot {
            snapshot,
            metadata: GeoIpMetadata {
                source: source.to_string(),
                version,
                source_checksum: checksum,
                path: None,
                last_updated: SystemTime::now(),
            },
        })
    }
}

/// Loads a snapshot from a local file.
pub async fn load_from_file(path: &Path) -> Result<LoadedSnapshot> {
    log::info!("Loading GeoIP snapshot from: {}", path.display());

    let db_bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read GeoIP snapshot from {}", path.display()))?;

    let mut loaded = LoadedSnapshot::from_bytes(db_bytes, &path.display().to_string(), None)
        .with_context(|| format!("Failed to load GeoIP snapshot from {}", path.display()))?;
    loaded.metadata.path = Some(path.to_path_buf());
    Ok(loaded)
}
