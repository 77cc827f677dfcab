//! Operations exposed to the outer API layer
//!
//! Out-of-band search, download-now, listing, removal and history. These go
//! through the same [`CatalogClient`] (and therefore the same rate limiter)
//! as the ingestion loop.

use std::sync::Arc;
use tracing::info;

use crate::catalog::{CatalogClient, CatalogError};
use crate::identifier::MediaId;
use crate::store::{discard_unrecorded, DedupStore, StoreError};
use crate::{MediaRecord, SearchHistoryEntry};

/// Result of a download-now request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The asset was fetched and persisted now
    Downloaded(MediaRecord),
    /// The asset was already on disk; nothing was fetched
    AlreadyDownloaded(MediaRecord),
}

impl DownloadOutcome {
    /// The record, either way
    pub fn record(&self) -> &MediaRecord {
        match self {
            Self::Downloaded(r) | Self::AlreadyDownloaded(r) => r,
        }
    }
}

/// Service facade over the catalog client and the dedup store
#[derive(Clone)]
pub struct MediaService {
    catalog: Arc<CatalogClient>,
    store: Arc<dyn DedupStore>,
}

impl MediaService {
    /// Create a service
    pub fn new(catalog: Arc<CatalogClient>, store: Arc<dyn DedupStore>) -> Self {
        Self { catalog, store }
    }

    /// Search and record the query in the history
    pub async fn search(&self, query: &str, max_results: usize) -> ServiceResult<Vec<MediaRecord>> {
        let records = self.catalog.search(query, max_results).await?;
        self.store.record_search(query, records.len())?;
        Ok(records)
    }

    /// Download a known item now
    ///
    /// # Errors
    /// [`ServiceError::NotFound`] for an id the store does not know;
    /// [`ServiceError::FetchFailed`] when the fetch fails (the store is left
    /// unchanged).
    pub async fn download(&self, id: &MediaId) -> ServiceResult<DownloadOutcome> {
        let record = self
            .store
            .get(id)?
            .ok_or_else(|| ServiceError::NotFound(id.clone()))?;
        self.download_record(record).await
    }

    /// Download `record` unless its asset is already on disk, then persist it
    pub async fn download_record(&self, record: MediaRecord) -> ServiceResult<DownloadOutcome> {
        if record.asset_exists() {
            return Ok(DownloadOutcome::AlreadyDownloaded(record));
        }

        let fetched = self.catalog.fetch(&record).await.map_err(|e| {
            if e.is_cancelled() {
                ServiceError::Catalog(e)
            } else {
                ServiceError::FetchFailed(e)
            }
        })?;
        if let Err(e) = self.store.upsert(fetched.clone()) {
            discard_unrecorded(self.store.as_ref(), self.catalog.layout(), &fetched);
            return Err(e.into());
        }
        info!(id = %fetched.id, "Media downloaded on demand");
        Ok(DownloadOutcome::Downloaded(fetched))
    }

    /// Remove a record and its assets
    pub fn remove(&self, id: &MediaId) -> ServiceResult<MediaRecord> {
        self.store.remove(id).map_err(|e| match e {
            StoreError::NotFound(id) => ServiceError::NotFound(id),
            other => ServiceError::Storage(other),
        })
    }

    /// All stored records
    pub fn list(&self) -> ServiceResult<Vec<MediaRecord>> {
        Ok(self.store.list()?)
    }

    /// Search history, oldest first
    pub fn history(&self) -> ServiceResult<Vec<SearchHistoryEntry>> {
        Ok(self.store.history()?)
    }

    /// Clear local paths pointing at missing assets
    pub fn reconcile(&self) -> ServiceResult<usize> {
        Ok(self.store.reconcile()?)
    }
}

impl std::fmt::Debug for MediaService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaService")
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

/// Service errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Unknown id
    #[error("media {0} not found")]
    NotFound(MediaId),

    /// Download-now failed; nothing was recorded
    #[error("download failed: {0}")]
    FetchFailed(CatalogError),

    /// Search failed or the call was cancelled
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Store failure
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
