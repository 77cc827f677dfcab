//! Pipeline configuration constants

use std::time::Duration;

/// Query the ingestion loop searches for when none is configured.
pub const DEFAULT_QUERY: &str = "ashley got";

/// Results requested per search cycle.
pub const DEFAULT_MAX_RESULTS: usize = 5;

/// Steady-state poll cadence (30 minutes).
/// Long enough not to hammer the source when nothing has gone wrong.
pub const STEADY_INTERVAL_SECS: u64 = 1800;

/// Error-recovery cadence (5 minutes). Must stay strictly below
/// [`STEADY_INTERVAL_SECS`].
pub const RECOVERY_INTERVAL_SECS: u64 = 300;

/// Default admitted calls per trailing 60 seconds.
pub const DEFAULT_PER_MINUTE: usize = 10;

/// Default admitted calls per trailing hour.
pub const DEFAULT_PER_HOUR: usize = 120;

/// Backoff floor, restored after every successful call.
pub const BACKOFF_FLOOR_MS: u64 = 1_000;

/// Backoff ceiling.
pub const BACKOFF_CEILING_MS: u64 = 60_000;

/// Default downloads in flight per cycle.
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 1;

/// Upper bound on downloads in flight per cycle.
pub const MAX_DOWNLOAD_CONCURRENCY: usize = 8;

/// Ingestion loop configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Fixed search query
    pub query: String,
    /// Results requested per search
    pub max_results: usize,
    /// Sleep after a clean cycle
    pub steady_interval: Duration,
    /// Sleep after a failed cycle
    pub recovery_interval: Duration,
    /// Downloads in flight within one cycle
    pub download_concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            query: DEFAULT_QUERY.to_string(),
            max_results: DEFAULT_MAX_RESULTS,
            steady_interval: Duration::from_secs(STEADY_INTERVAL_SECS),
            recovery_interval: Duration::from_secs(RECOVERY_INTERVAL_SECS),
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
        }
    }
}

impl IngestConfig {
    /// Override the search query
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// Override the per-search result count
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Override both cadences
    pub fn with_intervals(mut self, steady: Duration, recovery: Duration) -> Self {
        self.steady_interval = steady;
        self.recovery_interval = recovery;
        self
    }

    /// Override the per-cycle download concurrency
    pub fn with_download_concurrency(mut self, concurrency: usize) -> Self {
        self.download_concurrency = concurrency;
        self
    }

    /// Check the configuration for internal consistency
    pub fn validate(&self) -> Result<(), String> {
        if self.query.trim().is_empty() {
            return Err("search query cannot be empty".to_string());
        }
        if self.max_results == 0 {
            return Err("max_results must be at least 1".to_string());
        }
        if self.recovery_interval >= self.steady_interval {
            return Err(format!(
                "recovery interval ({:?}) must be shorter than steady interval ({:?})",
                self.recovery_interval, self.steady_interval
            ));
        }
        if self.download_concurrency == 0 || self.download_concurrency > MAX_DOWNLOAD_CONCURRENCY {
            return Err(format!(
                "download concurrency must be between 1 and {MAX_DOWNLOAD_CONCURRENCY}, got {}",
                self.download_concurrency
            ));
        }
        Ok(())
    }
}
