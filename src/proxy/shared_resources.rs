//! Shared HTTP client for proxy listing lookups
//!
//! One pooled [`reqwest::Client`] serves every lookup; the listing service is
//! hit once per outbound catalog call, so connection reuse matters.

use once_cell::sync::Lazy;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Connect timeout (seconds) for listing lookups
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 5;
/// Overall request timeout (seconds) for listing lookups
pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Global HTTP client shared by all proxy sources
///
/// Falls back to a default client if the configured builder fails, so a TLS
/// misconfiguration degrades to "no proxy" instead of a panic.
static GLOBAL_HTTP_CLIENT: Lazy<Arc<Client>> = Lazy::new(|| {
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to build configured HTTP client, using defaults");
            Client::new()
        });
    Arc::new(client)
});

/// Get the global HTTP client
///
/// Returns a clone of the Arc, which is cheap (just increments ref count)
pub fn global_http_client() -> Arc<Client> {
    GLOBAL_HTTP_CLIENT.clone()
}
