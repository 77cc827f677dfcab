//! Catalog access: search and fetch against the external media source
//!
//! [`CatalogBackend`] is the raw driver for one source (see
//! [`ytdlp::YtDlpBackend`]); [`CatalogClient`] wraps it with proxy
//! acquisition, shared rate limiting, bounded retries and partial-file
//! cleanup.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::assets::AssetLayout;
use crate::downloader::RateLimitError;
use crate::identifier::MediaId;
use crate::proxy::ProxyHandle;
use crate::MediaRecord;

pub mod client;
pub mod failure;
pub mod parser;
pub mod ytdlp;

pub use client::CatalogClient;
pub use failure::FailureKind;
pub use ytdlp::YtDlpBackend;

/// Default per-search time budget
pub const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 120;

/// Default per-download time budget
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 1800;

/// Default attempts per catalog call (each with a fresh proxy)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default format selector (best stream up to 720p)
pub const DEFAULT_FORMAT: &str = "best[height<=720]";

/// Default page URL prefix for entries that carry only an id
pub const DEFAULT_WATCH_URL_BASE: &str = "https://www.youtube.com/watch?v=";

/// Catalog settings shared by the client and the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    /// Where assets are written
    pub layout: AssetLayout,
    /// Backend executable
    pub program: PathBuf,
    /// Format selector handed to the backend
    pub format: String,
    /// Page URL prefix for bare ids
    pub watch_url_base: String,
    /// Per-search time budget
    pub search_timeout: Duration,
    /// Per-download time budget
    pub fetch_timeout: Duration,
    /// Attempts per call
    pub max_attempts: u32,
}

impl CatalogConfig {
    /// Defaults rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            layout: AssetLayout::new(data_dir),
            program: PathBuf::from("yt-dlp"),
            format: DEFAULT_FORMAT.to_string(),
            watch_url_base: DEFAULT_WATCH_URL_BASE.to_string(),
            search_timeout: Duration::from_secs(DEFAULT_SEARCH_TIMEOUT_SECS),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Override the backend executable
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Override the format selector
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Override attempts per call (at least one)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// Assets written by a successful fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAsset {
    /// Primary asset
    pub media_path: PathBuf,
    /// Companion thumbnail, if one was produced
    pub thumbnail_path: Option<PathBuf>,
}

/// Failure reported by a backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct BackendError {
    /// Classified failure
    pub kind: FailureKind,
    /// Backend diagnostics
    pub message: String,
}

impl BackendError {
    /// Create a backend error
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Raw driver for one catalog source
#[async_trait]
pub trait CatalogBackend: Send + Sync {
    /// Search by free text, returning ranked metadata-only records
    ///
    /// Malformed entries are skipped; an unreachable source is an error.
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        proxy: Option<&ProxyHandle>,
    ) -> Result<Vec<MediaRecord>, BackendError>;

    /// Download one item's asset (and thumbnail) under `layout`
    async fn fetch(
        &self,
        record: &MediaRecord,
        layout: &AssetLayout,
        proxy: Option<&ProxyHandle>,
    ) -> Result<FetchedAsset, BackendError>;

    /// Backend name for logs
    fn name(&self) -> &str;
}

/// Catalog client errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    /// Search failed after all attempts
    #[error("search for '{query}' failed: {kind}: {message}")]
    SearchFailed {
        /// Query issued
        query: String,
        /// Classified failure
        kind: FailureKind,
        /// Backend diagnostics
        message: String,
    },

    /// Fetch failed; nothing for this id is left on disk
    #[error("fetch of {id} failed: {kind}: {message}")]
    FetchFailed {
        /// Item requested
        id: MediaId,
        /// Classified failure
        kind: FailureKind,
        /// Backend diagnostics
        message: String,
    },

    /// Admission was cancelled by shutdown
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
}

impl CatalogError {
    /// Classified failure, if the call reached the backend
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::SearchFailed { kind, .. } | Self::FetchFailed { kind, .. } => Some(*kind),
            Self::RateLimit(_) => None,
        }
    }

    /// Whether the call was abandoned because of shutdown
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::RateLimit(RateLimitError::Cancelled))
    }
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;
