//! # Media Ingest Library
//!
//! A continuous media-discovery pipeline: a background loop periodically
//! searches an external catalog for a fixed query, downloads newly-seen items
//! exactly once, and records them in a durable dedup store. Every outbound
//! call is gated by a shared sliding-window rate limiter and routed through a
//! freshly acquired disposable proxy when one is available.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use media_ingest::catalog::{CatalogClient, CatalogConfig, YtDlpBackend};
//! use media_ingest::downloader::{IngestConfig, IngestLoop, RateLimitConfig, RateLimiter};
//! use media_ingest::proxy::DirectConnection;
//! use media_ingest::shutdown::ShutdownCoordinator;
//! use media_ingest::store::{DedupStore, JsonMediaStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let shutdown = ShutdownCoordinator::shared();
//! let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default())?.with_shutdown(shutdown.clone()));
//! let config = CatalogConfig::new("./data");
//! let backend = Arc::new(YtDlpBackend::new(&config));
//! let catalog = Arc::new(CatalogClient::new(backend, Arc::new(DirectConnection), limiter, config));
//! let store: Arc<dyn DedupStore> = Arc::new(JsonMediaStore::open("./data/media_db.json")?);
//!
//! let ingest = IngestLoop::new(catalog, store, IngestConfig::default(), shutdown)?;
//! ingest.run().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`downloader`] - Rate limiter, cadence configuration and the ingestion loop
//! - [`proxy`] - Disposable egress proxies, best effort
//! - [`catalog`] - Search and fetch against the external catalog
//! - [`store`] - Durable dedup store and search history
//! - [`assets`] - Deterministic on-disk layout for downloaded assets
//! - [`service`] - Operations exposed to the outer API layer
//! - [`shutdown`] - Cancellation shared by every suspension point

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Asset path layout
pub mod assets;

/// Catalog client and backends
pub mod catalog;

/// CLI command implementations
pub mod cli;

/// Rate limiting and the ingestion loop
pub mod downloader;

/// Media identifier validation
pub mod identifier;

/// Metrics collection
pub mod metrics;

/// Disposable proxy acquisition
pub mod proxy;

/// Operations exposed to the outer API layer
pub mod service;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Durable dedup store
pub mod store;

pub use identifier::MediaId;

/// One external item tracked by the system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaRecord {
    /// External identifier, unique within the store
    pub id: MediaId,
    /// Display title
    #[serde(default)]
    pub title: String,
    /// Canonical page URL on the source
    #[serde(default)]
    pub source_url: String,
    /// Remote thumbnail URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Duration in whole seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    /// Upload date reported by the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<NaiveDate>,
    /// Free-text description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Downloaded asset; `None` means discovered but not materialized
    #[serde(default)]
    pub local_path: Option<PathBuf>,
    /// Downloaded companion thumbnail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<PathBuf>,
    /// When the asset was materialized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl MediaRecord {
    /// Create a metadata-only record
    pub fn new(id: MediaId, title: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            source_url: source_url.into(),
            thumbnail_url: None,
            duration_seconds: None,
            upload_date: None,
            description: None,
            local_path: None,
            thumbnail_path: None,
            fetched_at: None,
        }
    }

    /// Whether the record claims a downloaded asset
    pub fn is_materialized(&self) -> bool {
        self.local_path.is_some()
    }

    /// Whether the claimed asset is actually present on disk
    pub fn asset_exists(&self) -> bool {
        self.local_path.as_ref().map(|p| p.is_file()).unwrap_or(false)
    }

    /// Drop local paths that no longer exist on disk
    ///
    /// Returns `true` if anything changed.
    pub fn clear_stale_paths(&mut self) -> bool {
        let mut changed = false;
        if self.local_path.as_ref().is_some_and(|p| !p.is_file()) {
            self.local_path = None;
            self.fetched_at = None;
            changed = true;
        }
        if self.thumbnail_path.as_ref().is_some_and(|p| !p.is_file()) {
            self.thumbnail_path = None;
            changed = true;
        }
        changed
    }
}

/// Append-only audit entry for one search call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchHistoryEntry {
    /// Query text as issued
    pub query: String,
    /// When the search completed
    pub timestamp: DateTime<Utc>,
    /// Number of records returned
    pub result_count: usize,
}

impl SearchHistoryEntry {
    /// Create an entry stamped with the current time
    pub fn now(query: impl Into<String>, result_count: usize) -> Self {
        Self {
            query: query.into(),
            timestamp: Utc::now(),
            result_count,
        }
    }
}
