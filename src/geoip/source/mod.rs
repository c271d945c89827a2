//! Where GeoIP snapshots come from.
//!
//! A source produces candidate bytes plus, when it publishes one, the
//! checksum the bytes must match. Everything after that (verification,
//! extraction, trial load, publication) is the scheduler's job.

mod download;
mod url_guard;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use url::Url;

use crate::config::{Config, LicenseKey, MAXMIND_DOWNLOAD_BASE};

use url_guard::redact_url;
pub(crate) use url_guard::redirect_policy;

/// A configured origin for GeoIP snapshots.
#[derive(Debug, Clone)]
pub enum SnapshotSource {
    /// MaxMind download API (`.tar.gz` plus a published sha256)
    MaxMind {
        /// Download endpoint (`MAXMIND_DOWNLOAD_BASE` in production)
        base_url: String,
        /// Edition to download, e.g. `GeoLite2-Country`
        edition_id: String,
        /// Download credential
        license_key: LicenseKey,
        /// Skip the private-host check (tests, on-prem mirrors)
        allow_private_hosts: bool,
    },
    /// Plain URL serving an `.mmdb`, a `.tar.gz` or a range table.
    /// A `<url>.sha256` companion is used when the server has one.
    Url {
        /// Snapshot URL
        url: String,
        /// Skip the private-host check
        allow_private_hosts: bool,
    },
    /// Local file, with an optional `<path>.sha256` sidecar
    File {
        /// Snapshot path
        path: PathBuf,
    },
}

/// Candidate bytes fetched from a source, not yet verified.
#[derive(Debug)]
pub struct FetchedSnapshot {
    /// Raw payload as delivered (possibly a `.tar.gz`)
    pub bytes: Vec<u8>,
    /// sha256 hex the bytes must match, when the source publishes one
    pub expected_checksum: Option<String>,
    /// Redacted description of the origin
    pub origin: String,
}

impl SnapshotSource {
    /// Builds the source described by the configuration.
    ///
    /// `geoip_source` wins when set: an `http(s)://` value is a URL, anything
    /// else is a local path. Otherwise a license key selects the MaxMind
    /// download of `geoip_edition`. Returns `None` when nothing is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        if let Some(source) = config.geoip_source.as_deref() {
            let source = source.trim();
            if source.starts_with("http://") || source.starts_with("https://") {
                return Some(SnapshotSource::Url {
                    url: source.to_string(),
                    allow_private_hosts: false,
                });
            }
            return Some(SnapshotSource::File {
                path: PathBuf::from(source),
            });
        }

        config
            .license_key
            .as_ref()
            .map(|license_key| SnapshotSource::MaxMind {
                base_url: MAXMIND_DOWNLOAD_BASE.to_string(),
                edition_id: config.geoip_edition.clone(),
                license_key: license_key.clone(),
                allow_private_hosts: false,
            })
    }

    /// Human readable description, safe to log.
    pub fn describe(&self) -> String {
        match self {
            SnapshotSource::MaxMind {
                base_url,
                edition_id,
                ..
            } => format!("maxmind:{} ({})", edition_id, redact_url(base_url)),
            SnapshotSource::Url { url, .. } => redact_url(url),
            SnapshotSource::File { path } => path.display().to_string(),
        }
    }

    /// Whether downloads may reach private or loopback hosts.
    pub fn allows_private_hosts(&self) -> bool {
        match self {
            SnapshotSource::MaxMind {
                allow_private_hosts,
                ..
            }
            | SnapshotSource::Url {
                allow_private_hosts,
                ..
            } => *allow_private_hosts,
            SnapshotSource::File { .. } => false,
        }
    }

    /// File name (or suffix) to look for when the payload is a `.tar.gz`.
    pub fn database_file_suffix(&self) -> String {
        match self {
            SnapshotSource::MaxMind { edition_id, .. } => format!("{}.mmdb", edition_id),
            _ => ".mmdb".to_string(),
        }
    }

    /// Fetches only the published checksum, if the source has one.
    ///
    /// Used to detect an unchanged upstream before downloading. Failure to
    /// obtain a checksum is not an error; the caller falls back to a full
    /// fetch.
    pub async fn probe_checksum(&self, client: &reqwest::Client) -> Option<String> {
        let result = match self {
            SnapshotSource::MaxMind { .. } | SnapshotSource::Url { .. } => {
                match self.checksum_url() {
                    Ok(url) => download::download_text(client, &url)
                        .await
                        .and_then(|body| parse_checksum_body(&body)),
                    Err(e) => Err(e),
                }
            }
            SnapshotSource::File { path } => read_sidecar_checksum(path).await,
        };

        match result {
            Ok(checksum) => Some(checksum),
            Err(e) => {
                log::debug!("No published checksum for {}: {:#}", self.describe(), e);
                None
            }
        }
    }

    /// Fetches the candidate snapshot.
    ///
    /// For MaxMind the published checksum is mandatory; a plain URL or file
    /// without one is accepted unverified.
    pub async fn fetch(&self, client: &reqwest::Client) -> Result<FetchedSnapshot> {
        match self {
            SnapshotSource::MaxMind { .. } => {
                let url = self.download_url()?;
                let checksum_url = self.checksum_url()?;
                let checksum_body = download::download_text(client, &checksum_url)
                    .await
                    .context("Failed to fetch published checksum")?;
                let expected = parse_checksum_body(&checksum_body)?;
                let bytes = download::download_with_retries(client, &url).await?;
                Ok(FetchedSnapshot {
                    bytes,
                    expected_checksum: Some(expected),
                    origin: self.describe(),
                })
            }
            SnapshotSource::Url {
                url,
                allow_private_hosts,
            } => {
                check_url(url, *allow_private_hosts)?;
                let expected = self.probe_checksum(client).await;
                let bytes = download::download_with_retries(client, url).await?;
                Ok(FetchedSnapshot {
                    bytes,
                    expected_checksum: expected,
                    origin: self.describe(),
                })
            }
            SnapshotSource::File { path } => {
                let bytes = tokio::fs::read(path).await.with_context(|| {
                    format!("Failed to read GeoIP snapshot from {}", path.display())
                })?;
                let expected = read_sidecar_checksum(path).await.ok();
                Ok(FetchedSnapshot {
                    bytes,
                    expected_checksum: expected,
                    origin: self.describe(),
                })
            }
        }
    }

    fn download_url(&self) -> Result<String> {
        self.maxmind_url("tar.gz")
    }

    fn checksum_url(&self) -> Result<String> {
        match self {
            SnapshotSource::MaxMind { .. } => self.maxmind_url("tar.gz.sha256"),
            SnapshotSource::Url {
                url,
                allow_private_hosts,
            } => {
                let checksum_url = format!("{}.sha256", url);
                check_url(&checksum_url, *allow_private_hosts)?;
                Ok(checksum_url)
            }
            SnapshotSource::File { .. } => {
                Err(anyhow::anyhow!("local sources have no checksum URL"))
            }
        }
    }

    fn maxmind_url(&self, suffix: &str) -> Result<String> {
        let SnapshotSource::MaxMind {
            base_url,
            edition_id,
            license_key,
            allow_private_hosts,
        } = self
        else {
            return Err(anyhow::anyhow!("not a MaxMind source"));
        };

        let mut url = Url::parse(base_url)
            .with_context(|| format!("Invalid MaxMind base URL: {}", redact_url(base_url)))?;
        url.query_pairs_mut()
            .append_pair("edition_id", edition_id)
            .append_pair("license_key", license_key.expose())
            .append_pair("suffix", suffix);
        let url = url.to_string();
        check_url(&url, *allow_private_hosts)?;
        Ok(url)
    }
}

fn check_url(url: &str, allow_private_hosts: bool) -> Result<()> {
    if allow_private_hosts {
        return Ok(());
    }
    url_guard::validate_download_url(url)
        .with_context(|| format!("Unsafe GeoIP URL rejected: {}", redact_url(url)))
}

/// Parses a published checksum (`"<hex>  <file name>"` or a bare hex digest).
pub(crate) fn parse_checksum_body(body: &str) -> Result<String> {
    let token = body
        .split_whitespace()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Checksum body is empty"))?;
    if token.len() != 64 || !token.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(anyhow::anyhow!("Malformed sha256 checksum '{}'", token));
    }
    Ok(token.to_ascii_lowercase())
}

async fn read_sidecar_checksum(path: &Path) -> Result<String> {
    let mut sidecar = path.as_os_str().to_owned();
    sidecar.push(".sha256");
    let body = tokio::fs::read_to_string(PathBuf::from(sidecar)).await?;
    parse_checksum_body(&body)
}
