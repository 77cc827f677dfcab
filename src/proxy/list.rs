//! Free-proxy listing service client
//!
//! Fetches a newline-separated listing (`host:port` or `scheme://host:port`
//! per line) and picks one entry at random. Every call re-fetches the listing;
//! addresses are never cached or reused deliberately.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::shared_resources::{global_http_client, HTTP_REQUEST_TIMEOUT_SECS};
use super::{ProxyError, ProxyHandle, ProxySource};

/// Default public listing endpoint
pub const DEFAULT_PROXY_LIST_URL: &str =
    "https://api.proxyscrape.com/v2/?request=displayproxies&protocol=http&timeout=5000&country=all";

/// Proxy source backed by an HTTP listing service
#[derive(Debug, Clone)]
pub struct ProxyListService {
    client: Arc<Client>,
    list_url: String,
    timeout: Duration,
}

impl ProxyListService {
    /// Create a source for `list_url` using the shared HTTP client
    pub fn new(list_url: impl Into<String>) -> Self {
        Self {
            client: global_http_client(),
            list_url: list_url.into(),
            timeout: Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Override the lookup timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Listing endpoint
    pub fn list_url(&self) -> &str {
        &self.list_url
    }

    /// Fetch the listing and pick one candidate
    ///
    /// This is the error-reporting form of [`ProxySource::next`].
    pub async fn try_next(&self) -> Result<ProxyHandle, ProxyError> {
        let body = self
            .client
            .get(&self.list_url)
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| ProxyError::Listing(e.to_string()))?
            .text()
            .await
            .map_err(|e| ProxyError::Listing(e.to_string()))?;

        let candidates = parse_listing(&body);
        debug!(candidates = candidates.len(), "Fetched proxy listing");

        let choice = candidates
            .choose(&mut rand::thread_rng())
            .ok_or(ProxyError::Empty)?;
        ProxyHandle::parse(choice)
    }
}

impl Default for ProxyListService {
    fn default() -> Self {
        Self::new(DEFAULT_PROXY_LIST_URL)
    }
}

#[async_trait]
impl ProxySource for ProxyListService {
    async fn next(&self) -> Option<ProxyHandle> {
        match self.try_next().await {
            Ok(proxy) => {
                debug!(proxy = %proxy, "Acquired proxy");
                crate::metrics::record_proxy_lookup(true);
                Some(proxy)
            }
            Err(e) => {
                warn!(error = %e, "No proxy available, proceeding direct");
                crate::metrics::record_proxy_lookup(false);
                None
            }
        }
    }
}

/// Non-empty, non-comment lines of a listing body
pub fn parse_listing(body: &str) -> Vec<&str> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}
