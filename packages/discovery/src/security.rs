//! Credential handling and outbound-URL protection.
//!
//! Candidate URLs arrive from the open web (search results, expanded
//! category pages), so every live crawl goes through [`UrlGuard`] first.
//! API keys use the `secrecy` crate to prevent accidental logging.

use secrecy::{ExposeSecret, SecretBox};
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

use crate::error::{CrawlError, CrawlResult};

/// A secret string that won't be logged or displayed.
pub struct SecretString(SecretBox<str>);

impl SecretString {
    /// Create a new secret string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretBox::new(Box::from(value.into().as_str())))
    }

    /// Expose the secret value for use.
    ///
    /// Only call this when actually using the secret (e.g., in an API request).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Clone for SecretString {
    fn clone(&self) -> Self {
        Self::new(self.expose().to_string())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// URL guard applied before any outbound crawl.
///
/// Blocks:
/// - Non-HTTP(S) schemes (file://, ftp://)
/// - Internal hosts (localhost, cloud metadata services)
/// - Private and link-local IP ranges
#[derive(Debug, Clone)]
pub struct UrlGuard {
    allowed_schemes: HashSet<String>,
    blocked_hosts: HashSet<String>,
    blocked_cidrs: Vec<ipnet::IpNet>,
    allowed_hosts: HashSet<String>,
}

impl Default for UrlGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlGuard {
    /// Create a new guard with default security rules.
    pub fn new() -> Self {
        Self {
            allowed_schemes: ["http", "https"].into_iter().map(String::from).collect(),
            blocked_hosts: [
                "localhost",
                "127.0.0.1",
                "::1",
                "[::1]",
                "0.0.0.0",
                "metadata.google.internal",
                "instance-data",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            blocked_cidrs: vec![
                "10.0.0.0/8".parse().unwrap(),
                "172.16.0.0/12".parse().unwrap(),
                "192.168.0.0/16".parse().unwrap(),
                "169.254.0.0/16".parse().unwrap(), // Link-local / cloud metadata
                "127.0.0.0/8".parse().unwrap(),    // Loopback
                "::1/128".parse().unwrap(),        // IPv6 loopback
                "fc00::/7".parse().unwrap(),       // IPv6 private
                "fe80::/10".parse().unwrap(),      // IPv6 link-local
            ],
            allowed_hosts: HashSet::new(),
        }
    }

    /// Add an allowed host (bypasses validation, for local test servers).
    pub fn allow_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts.insert(host.into());
        self
    }

    /// Block an additional host.
    pub fn block_host(mut self, host: impl Into<String>) -> Self {
        self.blocked_hosts.insert(host.into());
        self
    }

    /// Validate a URL for safety.
    pub fn validate(&self, url: &str) -> CrawlResult<()> {
        let parsed = url::Url::parse(url).map_err(|_| CrawlError::InvalidUrl {
            url: url.to_string(),
        })?;

        if !self.allowed_schemes.contains(parsed.scheme()) {
            return Err(CrawlError::Blocked {
                url: url.to_string(),
                reason: format!("disallowed scheme: {}", parsed.scheme()),
            });
        }

        let host = match parsed.host_str() {
            Some(h) => h,
            None => {
                return Err(CrawlError::Blocked {
                    url: url.to_string(),
                    reason: "URL has no host".to_string(),
                })
            }
        };

        if self.allowed_hosts.contains(host) {
            return Ok(());
        }

        if self.blocked_hosts.contains(host) {
            return Err(CrawlError::Blocked {
                url: url.to_string(),
                reason: format!("blocked host: {}", host),
            });
        }

        if let Ok(ip) = host.parse::<IpAddr>() {
            for cidr in &self.blocked_cidrs {
                if cidr.contains(&ip) {
                    return Err(CrawlError::Blocked {
                        url: url.to_string(),
                        reason: format!("blocked IP range: {}", ip),
                    });
                }
            }
        }

        Ok(())
    }

    /// Split a URL list into (allowed, blocked) preserving order.
    pub fn partition<'a>(&self, urls: &'a [String]) -> (Vec<&'a String>, Vec<&'a String>) {
        urls.iter().partition(|u| self.validate(u).is_ok())
    }
}
