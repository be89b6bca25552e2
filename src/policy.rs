// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Target Policy (SSRF Defense)
 * Scheme allow-list plus literal and DNS-resolved private-range rejection
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::debug;
use url::{Host, Url};

use crate::errors::{ScannerError, ScannerResult};

pub fn is_private_ipv4(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    addr.is_loopback()                                   // 127/8
        || addr.is_private()                             // 10/8, 172.16/12, 192.168/16
        || addr.is_link_local()                          // 169.254/16
        || addr.is_unspecified()                         // 0.0.0.0
        || octets[0] == 100 && (64..128).contains(&octets[1]) // 100.64/10 CGNAT
}

pub fn is_private_ipv6(addr: Ipv6Addr) -> bool {
    if addr.is_loopback() || addr.is_unspecified() {
        return true;
    }
    let segments = addr.segments();
    // fc00::/7 unique-local
    if (segments[0] & 0xfe00) == 0xfc00 {
        return true;
    }
    // fe80::/10 link-local
    if (segments[0] & 0xffc0) == 0xfe80 {
        return true;
    }
    // IPv4-mapped addresses inherit the IPv4 verdict
    if let Some(v4) = addr.to_ipv4_mapped() {
        return is_private_ipv4(v4);
    }
    false
}

pub fn is_private_ip(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_private_ipv4(v4),
        IpAddr::V6(v6) => is_private_ipv6(v6),
    }
}

fn is_local_hostname(host: &str) -> bool {
    let lowered = host.to_ascii_lowercase();
    lowered == "localhost"
        || lowered.ends_with(".localhost")
        || lowered == "localhost.localdomain"
        || lowered.ends_with(".local")
        || lowered.ends_with(".internal")
}

/// Validates scan targets against the SSRF policy before any network contact.
#[derive(Clone)]
pub struct TargetPolicy {
    resolver: TokioAsyncResolver,
    allow_private: bool,
    allow_hosts: HashSet<String>,
}

impl TargetPolicy {
    pub fn new() -> Self {
        Self::with_resolver(TokioAsyncResolver::tokio(
            ResolverConfig::default(),
            ResolverOpts::default(),
        ))
    }

    pub fn with_resolver(resolver: TokioAsyncResolver) -> Self {
        let allow_private = std::env::var("SSRF_ALLOW_PRIVATE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let allow_hosts = std::env::var("SSRF_ALLOW_HOSTS")
            .map(|v| {
                v.split(',')
                    .map(|h| h.trim().to_ascii_lowercase())
                    .filter(|h| !h.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            resolver,
            allow_private,
            allow_hosts,
        }
    }

    fn policy_err(url: &str, reason: &str) -> ScannerError {
        ScannerError::PolicyViolation {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Validate a scan target. Returns the parsed URL when allowed.
    ///
    /// Rejects non-http(s) schemes, literal loopback/local hostnames, private
    /// IP literals, and hostnames where *any* DNS answer lands in a private
    /// range. DNS failures surface as "Failed to resolve target host".
    pub async fn validate_target_url(&self, raw: &str) -> ScannerResult<Url> {
        let url = Url::parse(raw)
            .map_err(|_| Self::policy_err(raw, "Invalid or disallowed target URL"))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Self::policy_err(raw, "Invalid or disallowed target URL"));
        }

        let host = url
            .host()
            .ok_or_else(|| Self::policy_err(raw, "Invalid or disallowed target URL"))?;

        match host {
            Host::Ipv4(addr) => {
                if is_private_ipv4(addr) && !self.is_exempt(&addr.to_string()) {
                    return Err(Self::policy_err(
                        raw,
                        "Access to local addresses is not allowed",
                    ));
                }
            }
            Host::Ipv6(addr) => {
                if is_private_ipv6(addr) && !self.is_exempt(&addr.to_string()) {
                    return Err(Self::policy_err(
                        raw,
                        "Access to local addresses is not allowed",
                    ));
                }
            }
            Host::Domain(domain) => {
                if self.is_exempt(domain) {
                    return Ok(url);
                }
                if is_local_hostname(domain) {
                    return Err(Self::policy_err(
                        raw,
                        "Access to local addresses is not allowed",
                    ));
                }

                let lookup = self.resolver.lookup_ip(domain).await.map_err(|e| {
                    debug!(host = domain, error = %e, "DNS resolution failed");
                    Self::policy_err(raw, "Failed to resolve target host")
                })?;

                let mut any = false;
                for addr in lookup.iter() {
                    any = true;
                    if is_private_ip(addr) {
                        return Err(Self::policy_err(
                            raw,
                            "Access to local addresses is not allowed",
                        ));
                    }
                }
                if !any {
                    return Err(Self::policy_err(raw, "Failed to resolve target host"));
                }
            }
        }

        Ok(url)
    }

    fn is_exempt(&self, host: &str) -> bool {
        self.allow_private || self.allow_hosts.contains(&host.to_ascii_lowercase())
    }
}

impl Default for TargetPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_ipv4_ranges() {
        assert!(is_private_ipv4("127.0.0.1".parse().unwrap()));
        assert!(is_private_ipv4("10.0.0.5".parse().unwrap()));
        assert!(is_private_ipv4("169.254.1.1".parse().unwrap()));
        assert!(is_private_ipv4("172.16.0.1".parse().unwrap()));
        assert!(is_private_ipv4("172.31.255.255".parse().unwrap()));
        assert!(is_private_ipv4("192.168.1.1".parse().unwrap()));
        assert!(is_private_ipv4("0.0.0.0".parse().unwrap()));

        assert!(!is_private_ipv4("8.8.8.8".parse().unwrap()));
        assert!(!is_private_ipv4("172.32.0.1".parse().unwrap()));
        assert!(!is_private_ipv4("11.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_private_ipv6_ranges() {
        assert!(is_private_ipv6("::1".parse().unwrap()));
        assert!(is_private_ipv6("fc00::1".parse().unwrap()));
        assert!(is_private_ipv6("fd12:3456::1".parse().unwrap()));
        assert!(is_private_ipv6("fe80::1".parse().unwrap()));
        assert!(is_private_ipv6("::ffff:192.168.0.1".parse().unwrap()));

        assert!(!is_private_ipv6("2001:4860:4860::8888".parse().unwrap()));
    }

    #[test]
    fn test_local_hostnames() {
        assert!(is_local_hostname("localhost"));
        assert!(is_local_hostname("LOCALHOST"));
        assert!(is_local_hostname("foo.localhost"));
        assert!(is_local_hostname("printer.local"));
        assert!(is_local_hostname("db.internal"));
        assert!(!is_local_hostname("example.com"));
    }

    #[tokio::test]
    async fn test_loopback_literal_rejected() {
        let policy = TargetPolicy::new();
        let err = policy
            .validate_target_url("http://127.0.0.1")
            .await
            .unwrap_err();
        match err {
            ScannerError::PolicyViolation { reason, .. } => {
                assert_eq!(reason, "Access to local addresses is not allowed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_private_literal_rejected() {
        let policy = TargetPolicy::new();
        assert!(policy.validate_target_url("http://10.1.2.3/admin").await.is_err());
        assert!(policy.validate_target_url("http://[::1]:8080/").await.is_err());
        assert!(policy.validate_target_url("http://192.168.0.10/").await.is_err());
    }

    #[tokio::test]
    async fn test_non_http_scheme_rejected() {
        let policy = TargetPolicy::new();
        assert!(policy.validate_target_url("ftp://example.com").await.is_err());
        assert!(policy.validate_target_url("file:///etc/passwd").await.is_err());
        assert!(policy.validate_target_url("gopher://x").await.is_err());
    }

    #[tokio::test]
    async fn test_localhost_name_rejected_without_dns() {
        let policy = TargetPolicy::new();
        let err = policy
            .validate_target_url("http://localhost:3000")
            .await
            .unwrap_err();
        match err {
            ScannerError::PolicyViolation { reason, .. } => {
                assert_eq!(reason, "Access to local addresses is not allowed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_garbage_url_rejected() {
        let policy = TargetPolicy::new();
        assert!(policy.validate_target_url("not a url").await.is_err());
        assert!(policy.validate_target_url("http://").await.is_err());
    }
}
