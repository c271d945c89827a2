//! HTTP download with size limits and retries.

use anyhow::{Context, Result};
use reqwest::StatusCode;
use std::time::Duration;

use super::url_guard::redact_url;
use crate::config::{MAX_GEOIP_DOWNLOAD_SIZE, MAX_NETWORK_DOWNLOAD_RETRIES};

/// Maximum number of error body bytes kept in an error message
const MAX_ERROR_BODY_LEN: usize = 512;

/// Downloads `url`, retrying transient failures with exponential backoff
/// (2s, 4s, ...).
///
/// Client errors other than 408/429 are permanent (a bad license key will
/// not get better by asking again) and fail immediately.
pub(crate) async fn download_with_retries(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let display_url = redact_url(url);
    log::info!("Downloading GeoIP snapshot from: {}", display_url);

    let mut last_error = None;
    for attempt in 1..=MAX_NETWORK_DOWNLOAD_RETRIES {
        match download_with_size_limit(client, url).await {
            Ok(bytes) => return Ok(bytes),
            Err(DownloadError::Permanent(e)) => return Err(e),
            Err(DownloadError::Transient(e)) => {
                last_error = Some(e);
                if attempt < MAX_NETWORK_DOWNLOAD_RETRIES {
                    log::warn!(
                        "Failed to download GeoIP snapshot from {} (attempt {}/{}), retrying...",
                        display_url,
                        attempt,
                        MAX_NETWORK_DOWNLOAD_RETRIES
                    );
                    tokio::time::sleep(Duration::from_secs(2 << (attempt - 1))).await;
                }
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| anyhow::anyhow!("no download attempt was made"))
        .context(format!(
            "Failed to download GeoIP snapshot from {} after {} attempts",
            display_url, MAX_NETWORK_DOWNLOAD_RETRIES
        )))
}

/// Downloads a small text body (published checksums). No retries.
pub(crate) async fn download_text(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Request to {} failed: {}",
                redact_url(url),
                e.without_url()
            )
        })?;
    let status = response.status();
    if !status.is_success() {
        return Err(anyhow::anyhow!(
            "Checksum request to {} returned {}",
            redact_url(url),
            status
        ));
    }
    response
        .text()
        .await
        .with_context(|| format!("Failed to read checksum body from {}", redact_url(url)))
}

enum DownloadError {
    Permanent(anyhow::Error),
    Transient(anyhow::Error),
}

fn is_permanent(status: StatusCode) -> bool {
    status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
}

/// Downloads a snapshot with size limit enforcement
async fn download_with_size_limit(
    client: &reqwest::Client,
    url: &str,
) -> Result<Vec<u8>, DownloadError> {
    // reqwest errors embed the full URL, license key included
    let response = client.get(url).send().await.map_err(|e| {
        if e.is_redirect() {
            DownloadError::Permanent(anyhow::anyhow!(e.without_url()))
        } else {
            DownloadError::Transient(anyhow::anyhow!(e.without_url()))
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let mut error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "No error details".to_string());
        if error_body.len() > MAX_ERROR_BODY_LEN {
            let mut cut = MAX_ERROR_BODY_LEN;
            while !error_body.is_char_boundary(cut) {
                cut -= 1;
            }
            error_body.truncate(cut);
            error_body.push_str("...");
        }
        log::error!("GeoIP download error response ({}): {}", status, error_body);
        let err = anyhow::anyhow!(
            "Failed to download GeoIP snapshot: {} - {}",
            status,
            error_body
        );
        return Err(if is_permanent(status) {
            DownloadError::Permanent(err)
        } else {
            DownloadError::Transient(err)
        });
    }

    if let Some(content_length) = response.content_length() {
        if content_length > MAX_GEOIP_DOWNLOAD_SIZE as u64 {
            return Err(DownloadError::Permanent(anyhow::anyhow!(
                "GeoIP snapshot too large: {} bytes (max: {} bytes)",
                content_length,
                MAX_GEOIP_DOWNLOAD_SIZE
            )));
        }
    }

    let downloaded_bytes = response
        .bytes()
        .await
        .map_err(|e| DownloadError::Transient(anyhow::anyhow!(e.without_url())))?
        .to_vec();

    // Content-length may be missing or wrong
    if downloaded_bytes.len() > MAX_GEOIP_DOWNLOAD_SIZE {
        return Err(DownloadError::Permanent(anyhow::anyhow!(
            "GeoIP snapshot too large: {} bytes (max: {} bytes)",
            downloaded_bytes.len(),
            MAX_GEOIP_DOWNLOAD_SIZE
        )));
    }

    Ok(downloaded_bytes)
}
