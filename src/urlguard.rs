//! SSRF guard: reject task/notification URLs that target internal network
//! ranges. Enforced at task creation and at notification-webhook
//! configuration.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlGuardError {
    #[error("url could not be parsed: {0}")]
    Unparseable(String),
    #[error("url scheme must be http or https")]
    UnsupportedScheme,
    #[error("url has no host")]
    NoHost,
    #[error("url targets a disallowed host: {0}")]
    DisallowedHost(String),
}

/// Validate that `raw_url` is safe to issue outbound requests to.
///
/// Rejects loopback, RFC1918 private ranges, link-local (including the
/// cloud metadata address `169.254.169.254`), multicast, reserved, and
/// broadcast addresses, as well as `localhost`/`*.internal`/`*.local`/
/// `*.localhost` hostnames. Only literal IP hosts are checked against the
/// address ranges; hostname-based checks are name-pattern only (no DNS
/// resolution is performed here — callers that need resolved-address
/// checking should resolve first and re-validate the result).
pub fn validate(raw_url: &str) -> Result<Url, UrlGuardError> {
    let url = Url::parse(raw_url).map_err(|e| UrlGuardError::Unparseable(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        _ => return Err(UrlGuardError::UnsupportedScheme),
    }

    let host = url.host_str().ok_or(UrlGuardError::NoHost)?;

    if is_disallowed_hostname(host) {
        return Err(UrlGuardError::DisallowedHost(host.to_string()));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_disallowed_ip(ip) {
            return Err(UrlGuardError::DisallowedHost(host.to_string()));
        }
    }

    Ok(url)
}

fn is_disallowed_hostname(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host == "localhost"
        || host.ends_with(".internal")
        || host.ends_with(".local")
        || host.ends_with(".localhost")
}

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_disallowed_v4(v4),
        IpAddr::V6(v6) => is_disallowed_v6(v6),
    }
}

fn is_disallowed_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local() // covers 169.254.169.254
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_unspecified()
        || ip.is_documentation()
        // CGNAT range 100.64.0.0/10, used by some cloud metadata paths
        || (ip.octets()[0] == 100 && (64..=127).contains(&ip.octets()[1]))
}

fn is_disallowed_v6(ip: Ipv6Addr) -> bool {
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // unique local (fc00::/7) and link-local (fe80::/10)
        || (ip.segments()[0] & 0xfe00) == 0xfc00
        || (ip.segments()[0] & 0xffc0) == 0xfe80
        // IPv4-mapped addresses: unwrap and re-check
        || ip
            .to_ipv4_mapped()
            .map(is_disallowed_v4)
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_public_https_url() {
        assert!(validate("https://api.example.com/webhook").is_ok());
    }

    #[test]
    fn rejects_loopback() {
        assert!(validate("http://127.0.0.1/hook").is_err());
        assert!(validate("http://[::1]/hook").is_err());
    }

    #[test]
    fn rejects_private_ranges() {
        assert!(validate("http://10.0.0.5/hook").is_err());
        assert!(validate("http://172.16.0.1/hook").is_err());
        assert!(validate("http://192.168.1.1/hook").is_err());
    }

    #[test]
    fn rejects_metadata_address() {
        assert!(validate("http://169.254.169.254/latest/meta-data").is_err());
    }

    #[test]
    fn rejects_internal_hostnames() {
        assert!(validate("https://svc.internal/hook").is_err());
        assert!(validate("https://box.local/hook").is_err());
        assert!(validate("https://anything.localhost/hook").is_err());
        assert!(validate("https://localhost/hook").is_err());
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(validate("ftp://example.com/file").is_err());
    }

    #[test]
    fn rejects_unparseable_url() {
        assert!(validate("not a url").is_err());
    }
}
