//! Classification and formatting of catalog call failures.
//!
//! The catalog backend reports failures as an exit status plus free-form
//! diagnostics. This module turns those into a [`FailureKind`] so retries,
//! log messages and metrics can tell a throttled request from a dead proxy
//! or a removed item.

use std::fmt;
use std::time::Duration;

/// Classification of catalog failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Source throttled us (HTTP 429, bot check, explicit rate-limit text)
    RateLimited,
    /// Proxy refused, dropped or could not tunnel the connection
    ProxyFailure,
    /// The call exceeded its time budget
    Timeout,
    /// DNS failure, refused connection or unreachable network
    Offline,
    /// Item removed, private or otherwise not served
    Unavailable,
    /// Source answered with output we could not interpret
    Malformed,
    /// Download reported success but produced no asset
    MissingAsset,
    /// Local disk problem while writing the asset
    Storage,
    /// Backend executable could not be started
    Spawn,
    /// Anything else
    Generic,
}

impl FailureKind {
    /// Short stable label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::ProxyFailure => "proxy_failure",
            Self::Timeout => "timeout",
            Self::Offline => "offline",
            Self::Unavailable => "unavailable",
            Self::Malformed => "malformed",
            Self::MissingAsset => "missing_asset",
            Self::Storage => "storage",
            Self::Spawn => "spawn",
            Self::Generic => "generic",
        }
    }

    /// User-friendly description used inside log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate limit exceeded",
            Self::ProxyFailure => "proxy connection failed",
            Self::Timeout => "timed out",
            Self::Offline => "connection failed",
            Self::Unavailable => "item unavailable",
            Self::Malformed => "unreadable response",
            Self::MissingAsset => "no asset produced",
            Self::Storage => "local storage error",
            Self::Spawn => "downloader could not be started",
            Self::Generic => "catalog error",
        }
    }

    /// Suggested remediation presented with the final failure.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::RateLimited => "Lower --per-minute/--per-hour or lengthen the poll interval",
            Self::ProxyFailure => "Free proxies are flaky; try another listing or --no-proxy",
            Self::Timeout => "Check network latency or raise the backend timeout",
            Self::Offline => "Verify internet connectivity and DNS resolution",
            Self::Unavailable => "The item was removed or made private; nothing to retry",
            Self::Malformed => "Update the downloader executable; the source format may have changed",
            Self::MissingAsset => "Check the requested format is available for this item",
            Self::Storage => "Check free disk space and permissions on the data directory",
            Self::Spawn => "Install yt-dlp or point --yt-dlp at the executable",
            Self::Generic => "Inspect the log for the backend's diagnostics",
        }
    }

    /// Whether a failure of this kind is positively identified as quota-related.
    pub fn is_quota_related(&self) -> bool {
        matches!(self, Self::RateLimited)
    }

    /// Whether another attempt within the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ProxyFailure | Self::Timeout | Self::Offline | Self::Generic
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Classify backend diagnostics (stderr text) into a [`FailureKind`].
pub fn classify_diagnostics(text: &str) -> FailureKind {
    let text = text.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if has(&[
        "http error 429",
        "too many requests",
        "rate limit",
        "rate-limit",
        "ratelimit",
        "confirm you",
    ]) {
        FailureKind::RateLimited
    } else if has(&["proxyerror", "proxy error", "unable to connect to proxy", "tunnel connection failed", "socks"]) {
        FailureKind::ProxyFailure
    } else if has(&["timed out", "timeout"]) {
        FailureKind::Timeout
    } else if has(&[
        "name or service not known",
        "temporary failure in name resolution",
        "nodename nor servname",
        "network is unreachable",
        "connection refused",
        "connection reset",
    ]) {
        FailureKind::Offline
    } else if has(&["no space left on device", "permission denied", "read-only file system"]) {
        FailureKind::Storage
    } else if has(&[
        "video unavailable",
        "private video",
        "has been removed",
        "not available",
        "http error 404",
        "members-only",
    ]) {
        FailureKind::Unavailable
    } else {
        FailureKind::Generic
    }
}

/// Last few non-empty lines of diagnostics, for compact error messages.
pub fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join(" | ")
}

/// Context for formatting attempt messages.
#[derive(Debug, Clone)]
pub struct AttemptContext<'a> {
    /// Operation name (`search` / `fetch`)
    pub operation: &'static str,
    /// Query or media id the call is about
    pub subject: &'a str,
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Failure that ended this attempt
    pub kind: FailureKind,
    /// Whether the attempt went through a proxy
    pub via_proxy: bool,
}

impl AttemptContext<'_> {
    /// Standardized retry message.
    pub fn format_retry(&self, backoff: Duration) -> String {
        format!(
            "Retrying {} (attempt {}/{}) after {}{} - backed off {:.1} seconds ({})",
            self.operation,
            self.attempt,
            self.max_attempts,
            self.kind.description(),
            if self.via_proxy { " via proxy" } else { "" },
            backoff.as_secs_f64(),
            self.subject
        )
    }

    /// Final failure summary with a suggestion.
    pub fn format_failure(&self, message: &str) -> String {
        format!(
            "[FAILED] {} '{}' failed after {} attempt(s): {} ({}). Suggestion: {}",
            self.operation,
            self.subject,
            self.attempt,
            self.kind.description(),
            message,
            self.kind.suggestion()
        )
    }
}
