//! Metadata management for GeoIP snapshots.
//!
//! The metadata file records which snapshot file is active and the checksum
//! it was published with, so restarts reuse the cache and unchanged upstream
//! releases are detected without a download.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

use super::types::GeoIpMetadata;

/// Hex-encoded sha256 of a buffer.
pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Loads metadata from the cache file
pub(crate) async fn load_metadata(metadata_file: &Path) -> Result<GeoIpMetadata> {
    let content = tokio::fs::read_to_string(metadata_file).await?;
    let metadata: GeoIpMetadata = serde_json::from_str(&content)?;
    Ok(metadata)
}

/// Saves metadata to the cache file.
///
/// Written to a sibling temporary file and renamed into place so readers
/// never see a half-written file.
pub(crate) async fn save_metadata(metadata: &GeoIpMetadata, metadata_file: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(metadata)?;
    let tmp_file = metadata_file.with_extension("json.tmp");
    tokio::fs::write(&tmp_file, content)
        .await
        .with_context(|| format!("Failed to write metadata file {}", tmp_file.display()))?;
    tokio::fs::rename(&tmp_file, metadata_file)
        .await
        .with_context(|| format!("Failed to replace metadata file {}", metadata_file.display()))?;
    Ok(())
}
