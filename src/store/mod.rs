//! Durable dedup store
//!
//! Records every item the pipeline has materialized, keyed by [`MediaId`],
//! plus an append-only search history. The JSON implementation
//! ([`JsonMediaStore`]) flushes every mutation with an atomic
//! temp-file-and-rename so a crash never leaves a torn document.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::assets::AssetLayout;
use crate::identifier::MediaId;
use crate::{MediaRecord, SearchHistoryEntry};

pub mod document;
pub mod media_store;

pub use document::StoreDocument;
pub use media_store::JsonMediaStore;

/// Default store file name inside the data directory
pub const STORE_FILE_NAME: &str = "media_db.json";

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New id
    Inserted,
    /// Existing id with different content, replaced in place
    Updated,
    /// Identical content; nothing was written
    Unchanged,
}

/// Persistent mapping from id to record
///
/// Implementations must be durable (every successful mutation survives a
/// restart) and must never reference an asset that is not on disk.
pub trait DedupStore: Send + Sync {
    /// Whether `id` is present
    fn contains(&self, id: &MediaId) -> StoreResult<bool>;

    /// Record for `id`, if present
    fn get(&self, id: &MediaId) -> StoreResult<Option<MediaRecord>>;

    /// Whether `id` is present with its asset on disk
    fn is_materialized(&self, id: &MediaId) -> StoreResult<bool> {
        Ok(self.get(id)?.is_some_and(|r| r.asset_exists()))
    }

    /// Insert or replace a record; identical content is a no-op
    ///
    /// # Errors
    /// [`StoreError::MissingAsset`] if `local_path` names a missing file.
    fn upsert(&self, record: MediaRecord) -> StoreResult<UpsertOutcome>;

    /// Remove the record and its on-disk assets, all or nothing
    ///
    /// # Errors
    /// [`StoreError::NotFound`] for an unknown id; on any asset or
    /// persistence failure the record stays.
    fn remove(&self, id: &MediaId) -> StoreResult<MediaRecord>;

    /// All records in insertion order
    fn list(&self) -> StoreResult<Vec<MediaRecord>>;

    /// Append a search history entry
    fn record_search(&self, query: &str, result_count: usize) -> StoreResult<()>;

    /// Search history, oldest first
    fn history(&self) -> StoreResult<Vec<SearchHistoryEntry>>;

    /// Clear local paths that point at missing files
    ///
    /// Returns the number of records changed.
    fn reconcile(&self) -> StoreResult<usize>;
}

/// Delete the files of a fetch that could not be recorded
///
/// Files the store currently references for the same id are kept, since a
/// concurrent download of that id may have committed them in the meantime.
pub fn discard_unrecorded(store: &dyn DedupStore, layout: &AssetLayout, fetched: &MediaRecord) {
    let recorded = match store.get(&fetched.id) {
        Ok(recorded) => recorded,
        Err(e) => {
            warn!(id = %fetched.id, error = %e, "Cannot check store, keeping fetched asset");
            return;
        }
    };
    let referenced = |path: &Path| {
        recorded.as_ref().is_some_and(|r| {
            r.local_path.as_deref() == Some(path) || r.thumbnail_path.as_deref() == Some(path)
        })
    };

    for path in [fetched.local_path.as_deref(), fetched.thumbnail_path.as_deref()]
        .into_iter()
        .flatten()
    {
        if referenced(path) {
            debug!(id = %fetched.id, path = %path.display(), "Asset is recorded, keeping it");
        } else if let Err(e) = layout.discard_file(&fetched.id, path) {
            warn!(path = %path.display(), error = %e, "Failed to discard unrecorded asset");
        }
    }
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unknown id
    #[error("media {0} not found")]
    NotFound(MediaId),

    /// Record references an asset that is not on disk
    #[error("asset for {id} is missing: {}", path.display())]
    MissingAsset {
        /// Record id
        id: MediaId,
        /// Claimed asset path
        path: PathBuf,
    },

    /// Asset could not be removed; the record was kept
    #[error("failed to remove asset {}: {message}", path.display())]
    AssetRemoval {
        /// Asset that could not be staged for removal
        path: PathBuf,
        /// Underlying error
        message: String,
    },

    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// Store file too large
    #[error("store file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Lock error
    #[error("lock error: {0}")]
    Lock(String),

    /// A previous writer panicked mid-mutation
    #[error("store state poisoned")]
    Poisoned,
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
