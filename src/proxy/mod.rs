//! Disposable egress proxies
//!
//! A [`ProxySource`] hands out one candidate proxy per outbound call attempt.
//! Absence of a proxy is an expected outcome: callers proceed with a direct
//! connection. Nothing here retries or health-checks; a bad proxy surfaces as
//! a failed catalog call, which the catalog client already handles.

use async_trait::async_trait;
use std::fmt;

pub mod list;
pub mod shared_resources;

pub use list::ProxyListService;

/// Schemes accepted for proxy addresses
const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "socks5", "socks5h"];

/// A short-lived egress address, owned for the duration of one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyHandle {
    url: reqwest::Url,
}

impl ProxyHandle {
    /// Parse a proxy address
    ///
    /// Bare `host:port` entries default to `http://`.
    pub fn parse(candidate: &str) -> Result<Self, ProxyError> {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            return Err(ProxyError::Malformed(candidate.to_string()));
        }

        let with_scheme = if candidate.contains("://") {
            candidate.to_string()
        } else {
            format!("http://{candidate}")
        };

        let url = reqwest::Url::parse(&with_scheme)
            .map_err(|_| ProxyError::Malformed(candidate.to_string()))?;
        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(ProxyError::Malformed(candidate.to_string()));
        }
        if url.host_str().map(str::is_empty).unwrap_or(true) || url.port().is_none() {
            return Err(ProxyError::Malformed(candidate.to_string()));
        }

        Ok(Self { url })
    }

    /// Proxy URL as a string, e.g. `http://10.0.0.1:8080`
    pub fn as_str(&self) -> &str {
        // Url keeps a trailing slash for an empty path; the proxy flag of the
        // catalog backend wants the bare authority form.
        self.url.as_str().trim_end_matches('/')
    }

    /// Parsed URL
    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }
}

impl fmt::Display for ProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supplier of disposable proxies
#[async_trait]
pub trait ProxySource: Send + Sync {
    /// Obtain one candidate proxy, or `None` to proceed direct
    async fn next(&self) -> Option<ProxyHandle>;
}

/// Proxy source that never yields a proxy
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectConnection;

#[async_trait]
impl ProxySource for DirectConnection {
    async fn next(&self) -> Option<ProxyHandle> {
        None
    }
}

/// Why a proxy could not be obtained
///
/// Only used for logging; [`ProxySource::next`] collapses all of these to `None`.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Listing service request failed
    #[error("proxy listing request failed: {0}")]
    Listing(String),

    /// Listing contained no usable entries
    #[error("proxy listing was empty")]
    Empty,

    /// Candidate address did not parse
    #[error("malformed proxy address: '{0}'")]
    Malformed(String),
}
