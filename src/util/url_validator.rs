use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use url::{Host, Url};

/// Why a subscription URL was refused.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UrlValidationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error("Private address not allowed: {0}")]
    PrivateAddress(String),
    #[error("Localhost not allowed")]
    Localhost,
}

/// Validate a feed origin URL before it is stored.
///
/// Only `http` and `https` are accepted. Unless `allow_private` is set,
/// loopback, private, link-local, CGNAT and unspecified addresses are refused,
/// including IPv4 addresses wrapped in IPv6. Host names are not resolved.
///
/// ```
/// use feedmill::util::validate_feed_url;
///
/// assert!(validate_feed_url("https://example.com/feed.xml", false).is_ok());
/// assert!(validate_feed_url("http://192.168.1.1/feed", false).is_err());
/// assert!(validate_feed_url("http://192.168.1.1/feed", true).is_ok());
/// assert!(validate_feed_url("file:///etc/passwd", true).is_err());
/// ```
pub fn validate_feed_url(raw: &str, allow_private: bool) -> Result<Url, UrlValidationError> {
    let url = Url::parse(raw.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    let host = url.host().ok_or(UrlValidationError::MissingHost)?;
    if allow_private {
        return Ok(url);
    }

    let ip = match host {
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.');
            if domain.eq_ignore_ascii_case("localhost")
                || domain.to_ascii_lowercase().ends_with(".localhost")
            {
                return Err(UrlValidationError::Localhost);
            }
            return Ok(url);
        }
        Host::Ipv4(v4) => IpAddr::V4(v4),
        Host::Ipv6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
    };

    if ip.is_loopback() {
        return Err(UrlValidationError::Localhost);
    }
    let private = match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    };
    if private {
        return Err(UrlValidationError::PrivateAddress(ip.to_string()));
    }

    Ok(url)
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // Shared address space (100.64.0.0/10)
        || (a == 100 && (b & 0xc0) == 64)
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_unspecified()
        // Unique local (fc00::/7)
        || (first & 0xfe00) == 0xfc00
        // Link-local (fe80::/10)
        || (first & 0xffc0) == 0xfe80
}
