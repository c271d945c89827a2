//! Download URL checks.
//!
//! Snapshot URLs come from operator configuration, but a typo or a hostile
//! config push must not turn the refresher into a scanner of internal
//! services. URLs are rejected unless they use http(s) and point at a
//! public host. Credentials in query strings are redacted before logging.

use anyhow::{Context, Result};
use std::net::{Ipv4Addr, Ipv6Addr};
use url::Url;

/// Query parameters whose values are never logged.
const SECRET_QUERY_KEYS: &[&str] = &["license_key", "key", "token"];

/// Maximum redirect hops followed for a download
const MAX_REDIRECTS: usize = 5;

/// Validates that a snapshot URL is safe to fetch.
///
/// Rejects non-http(s) schemes, localhost names, and private, loopback,
/// link-local, multicast or reserved addresses.
pub(crate) fn validate_download_url(url_str: &str) -> Result<()> {
    let url = Url::parse(url_str)
        .with_context(|| format!("Failed to parse URL: {}", redact_url(url_str)))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(anyhow::anyhow!(
                "Unsafe URL scheme '{}' (only http:// and https:// allowed)",
                scheme
            ));
        }
    }

    match url.host() {
        Some(url::Host::Domain(domain)) if is_localhost_domain(domain) => Err(anyhow::anyhow!(
            "Unsafe URL: localhost domain '{}' is not allowed",
            domain
        )),
        Some(url::Host::Ipv4(ip)) if is_private_ipv4(ip) => Err(anyhow::anyhow!(
            "Unsafe URL: private IPv4 address '{}' is not allowed",
            ip
        )),
        Some(url::Host::Ipv6(ip)) if is_private_ipv6(ip) => Err(anyhow::anyhow!(
            "Unsafe URL: private IPv6 address '{}' is not allowed",
            ip
        )),
        Some(_) => Ok(()),
        None => Err(anyhow::anyhow!("URL has no host component")),
    }
}

/// Redirect policy for download clients.
///
/// Every hop is checked with [`validate_download_url`], so a public URL
/// cannot bounce the client onto a private address. `allow_private_hosts`
/// only lifts the host check; the hop limit still applies.
pub(crate) fn redirect_policy(allow_private_hosts: bool) -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("too many redirects (max {})", MAX_REDIRECTS));
        }
        if allow_private_hosts {
            return attempt.follow();
        }
        match validate_download_url(attempt.url().as_str()) {
            Ok(()) => attempt.follow(),
            Err(e) => attempt.error(format!("redirect refused: {}", e)),
        }
    })
}

/// Returns the URL with secret query values replaced by `<redacted>`.
///
/// Unparsable input is returned as a fixed placeholder rather than echoed,
/// since it may still contain a credential.
pub(crate) fn redact_url(url_str: &str) -> String {
    let Ok(mut url) = Url::parse(url_str) else {
        return "<unparsable url>".to_string();
    };
    if url.query().is_none() {
        return url.to_string();
    }

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let value = if SECRET_QUERY_KEYS.contains(&k.as_ref()) {
                "<redacted>".to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), value)
        })
        .collect();

    url.query_pairs_mut().clear().extend_pairs(pairs);
    url.to_string()
}

fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || octets[0] == 0
        // 240.0.0.0/4 (reserved)
        || octets[0] >= 240
        // 100.64.0.0/10 (carrier-grade NAT)
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
}

fn is_private_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_ipv4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 (unique local)
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 (link-local)
        || (first & 0xffc0) == 0xfe80
        || ip.is_multicast()
}

fn is_localhost_domain(domain: &str) -> bool {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    domain == "localhost" || domain == "localhost.localdomain" || domain.ends_with(".localhost")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_urls_allowed() {
        assert!(validate_download_url("https://download.maxmind.com/app/geoip_download").is_ok());
        assert!(validate_download_url("http://203.0.113.1/ranges.csv").is_ok());
        assert!(validate_download_url("https://[2001:4860:4860::8888]/db.mmdb").is_ok());
    }

    #[test]
    fn test_private_hosts_rejected() {
        for url in [
            "http://127.0.0.1/db.mmdb",
            "http://localhost/db.mmdb",
            "http://mirror.localhost./db.mmdb",
            "http://10.0.0.1/db.mmdb",
            "http://172.16.0.1/db.mmdb",
            "http://192.168.1.1/db.mmdb",
            "http://169.254.169.254/latest/meta-data",
            "http://100.64.0.1/db.mmdb",
            "http://0.0.0.0/db.mmdb",
            "http://240.0.0.1/db.mmdb",
            "http://[::1]/db.mmdb",
            "http://[fc00::1]/db.mmdb",
            "http://[fe80::1]/db.mmdb",
            "http://[::ffff:127.0.0.1]/db.mmdb",
        ] {
            assert!(validate_download_url(url).is_err(), "{} should be rejected", url);
        }
    }

    #[test]
    fn test_unsafe_scheme_rejected() {
        let err = validate_download_url("file:///etc/passwd").unwrap_err();
        assert!(err.to_string().contains("scheme"));
        assert!(validate_download_url("ftp://example.com/db.mmdb").is_err());
    }

    #[test]
    fn test_unparsable_url_rejected() {
        assert!(validate_download_url("not a url").is_err());
    }

    #[test]
    fn test_redact_url_hides_license_key() {
        let redacted = redact_url(concat!(
            "https://download.maxmind.com/app/geoip_download",
            "?edition_id=GeoLite2-Country&license_key=s3cr3t&suffix=tar.gz",
        ));
        assert!(!redacted.contains("s3cr3t"));
        assert!(redacted.contains("edition_id=GeoLite2-Country"));
        assert!(redacted.contains("suffix=tar.gz"));
    }

    #[test]
    fn test_redact_url_without_query() {
        assert_eq!(
            redact_url("https://example.com/ranges.csv"),
            "https://example.com/ranges.csv"
        );
        assert_eq!(redact_url("::bad::license_key=x"), "<unparsable url>");
    }
}
