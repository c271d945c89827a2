//! GeoIP data structures.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::SystemTime;

/// ISO 3166-1 alpha-2 country code, normalised to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CountryCode(String);

impl CountryCode {
    /// Parses a two-letter country code (case-insensitive).
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(CountryCode(trimmed.to_ascii_uppercase()))
        } else {
            Err(format!("invalid country code '{}'", raw))
        }
    }

    /// The upper-case code.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for CountryCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CountryCode::parse(s)
    }
}

impl TryFrom<String> for CountryCode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CountryCode::parse(&value)
    }
}

impl From<CountryCode> for String {
    fn from(code: CountryCode) -> Self {
        code.0
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a GeoIP lookup against a loaded snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The snapshot maps the address to a country
    Country(CountryCode),
    /// The snapshot has no country for the address
    Unknown,
}

impl Resolution {
    /// The resolved country, if any.
    pub fn country(&self) -> Option<&CountryCode> {
        match self {
            Resolution::Country(code) => Some(code),
            Resolution::Unknown => None,
        }
    }
}

/// Metadata about a GeoIP snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoIpMetadata {
    /// Where the snapshot came from (URLs are stored with credentials redacted)
    pub source: String,
    /// Database build id (`build_<epoch>` for MaxMind, table version otherwise)
    pub version: String,
    /// sha256 of the bytes delivered by the source (archive or file)
    pub source_checksum: String,
    /// Local snapshot file, once persisted into the cache directory
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Last update timestamp
    pub last_updated: SystemTime,
}
