//! Archive extraction utilities.
//!
//! Vendor downloads arrive as `.tar.gz` archives with the database file
//! nested in a dated directory (`GeoLite2-Country_20240604/GeoLite2-Country.mmdb`).

use anyhow::{Context, Result};

use crate::config::MAX_GEOIP_EXTRACTED_SIZE;

/// Gzip magic number
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Whether the buffer starts with the gzip magic number.
pub(crate) fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() > 2 && bytes[..2] == GZIP_MAGIC
}

/// Extracts the first entry whose file name ends with `file_suffix` from a
/// tar.gz archive.
///
/// `file_suffix` is either an exact database file name (`GeoLite2-Country.mmdb`)
/// or an extension (`.mmdb`). Matching is case-sensitive. A member that
/// decompresses past [`MAX_GEOIP_EXTRACTED_SIZE`] is rejected.
pub(crate) fn extract_database_from_tar_gz(
    tar_gz_bytes: &[u8],
    file_suffix: &str,
) -> Result<Vec<u8>> {
    extract_with_limit(tar_gz_bytes, file_suffix, MAX_GEOIP_EXTRACTED_SIZE)
}

fn extract_with_limit(tar_gz_bytes: &[u8], file_suffix: &str, limit: usize) -> Result<Vec<u8>> {
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tar::Archive;

    log::debug!("Extracting '{}' from tar.gz archive", file_suffix);

    let gz_decoder = GzDecoder::new(tar_gz_bytes);
    let mut tar_archive = Archive::new(gz_decoder);

    let entries = tar_archive
        .entries()
        .with_context(|| "Failed to read tar archive entries")?;

    for entry_result in entries {
        let mut entry = entry_result.with_context(|| "Failed to read tar entry")?;
        let path = entry.path().with_context(|| "Failed to get entry path")?;

        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(file_suffix));
        if matches {
            let mut db_bytes = Vec::new();
            entry
                .take(limit as u64 + 1)
                .read_to_end(&mut db_bytes)
                .with_context(|| format!("Failed to read '{}' from archive", file_suffix))?;
            if db_bytes.len() > limit {
                return Err(anyhow::anyhow!(
                    "'{}' in archive is too large (limit: {} bytes)",
                    file_suffix,
                    limit
                ));
            }
            log::info!(
                "Extracted '{}' from tar.gz ({} bytes)",
                file_suffix,
                db_bytes.len()
            );
            return Ok(db_bytes);
        }
    }

    Err(anyhow::anyhow!(
        "'{}' not found in tar.gz archive",
        file_suffix
    ))
}
