//! HTTP client initialization.

use std::time::Duration;

use reqwest::ClientBuilder;

use crate::error_handling::InitializationError;
use crate::geoip::redirect_policy;

/// Initializes the HTTP client used for GeoIP downloads.
///
/// `timeout` bounds a whole request, body included, so a stalled download is
/// aborted rather than left hanging. Redirects are followed only to hosts
/// that pass the download URL checks, unless `allow_private_hosts` is set.
///
/// # Errors
///
/// Returns `InitializationError::HttpClientError` if client creation fails.
pub fn init_download_client(
    timeout: Duration,
    allow_private_hosts: bool,
) -> Result<reqwest::Client, InitializationError> {
    let client = ClientBuilder::new()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(30)))
        .redirect(redirect_policy(allow_private_hosts))
        .user_agent(concat!("access_guard/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}
