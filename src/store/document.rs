//! On-disk store document
//!
//! Atomic writes go through a temp file in the target directory that is
//! fsynced and renamed over the document. An advisory lock on a sibling
//! `.lock` file serializes writers across processes, and [`StoreDocument::update`]
//! re-reads the document under that lock so no writer saves over another's
//! changes.

use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::StoreError;
use crate::identifier::MediaId;
use crate::{MediaRecord, SearchHistoryEntry};

/// Current store schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum allowed store file size (64 MB) to prevent memory exhaustion
pub const MAX_STORE_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Whole store contents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreDocument {
    schema_version: String,
    #[serde(default)]
    records: Vec<MediaRecord>,
    #[serde(default)]
    history: Vec<SearchHistoryEntry>,
    updated_at: DateTime<Utc>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            records: Vec::new(),
            history: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

impl StoreDocument {
    /// Records in insertion order
    pub fn records(&self) -> &[MediaRecord] {
        &self.records
    }

    /// Search history, oldest first
    pub fn history(&self) -> &[SearchHistoryEntry] {
        &self.history
    }

    /// Last mutation time
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Record for `id`
    pub fn get(&self, id: &MediaId) -> Option<&MediaRecord> {
        self.records.iter().find(|r| &r.id == id)
    }

    pub(crate) fn position(&self, id: &MediaId) -> Option<usize> {
        self.records.iter().position(|r| &r.id == id)
    }

    pub(crate) fn records_mut(&mut self) -> &mut Vec<MediaRecord> {
        &mut self.records
    }

    pub(crate) fn push_history(&mut self, entry: SearchHistoryEntry) {
        self.history.push(entry);
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Lock file guarding `path`
    pub fn lock_path(path: &Path) -> PathBuf {
        path.with_extension("lock")
    }

    /// Save the document with an atomic write under an exclusive lock
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let mut lock = RwLock::new(open_lock_file(path)?);
        let _guard = lock
            .write()
            .map_err(|e| StoreError::Lock(format!("Failed to acquire write lock: {e}")))?;
        self.write_to(path)
    }

    /// Load a document under a shared lock
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let lock = RwLock::new(open_lock_file(path)?);
        let _guard = lock
            .read()
            .map_err(|e| StoreError::Lock(format!("Failed to acquire read lock: {e}")))?;
        Self::read_from(path)
    }

    /// Read-modify-write under one exclusive lock
    ///
    /// The document is re-read from disk after the lock is taken, so changes
    /// saved by other handles (or processes) since this one last looked are
    /// kept. `apply` returns its result plus whether it changed anything; an
    /// unchanged document is not written. Returns the current document.
    pub fn update<T>(
        path: &Path,
        apply: impl FnOnce(&mut Self) -> Result<(T, bool), StoreError>,
    ) -> Result<(Self, T), StoreError> {
        let mut lock = RwLock::new(open_lock_file(path)?);
        let _guard = lock
            .write()
            .map_err(|e| StoreError::Lock(format!("Failed to acquire write lock: {e}")))?;

        let mut document = if path.exists() {
            Self::read_from(path)?
        } else {
            Self::default()
        };
        let (value, changed) = apply(&mut document)?;
        if changed {
            document.touch();
            document.write_to(path)?;
        }
        Ok((document, value))
    }

    fn write_to(&self, path: &Path) -> Result<(), StoreError> {
        debug!(
            path = %path.display(),
            records = self.records.len(),
            "Saving media store"
        );

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let parent_dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| StoreError::Io(format!("Failed to create temp file: {e}")))?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| StoreError::Io(format!("Failed to write temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| StoreError::Io(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| StoreError::Io(format!("Failed to sync temp file: {e}")))?;
        temp_file
            .persist(path)
            .map_err(|e| StoreError::Io(format!("Failed to persist temp file: {e}")))?;

        // Make the rename itself durable.
        if let Err(e) = File::open(parent_dir).and_then(|dir| dir.sync_all()) {
            debug!(dir = %parent_dir.display(), error = %e, "Directory sync skipped");
        }

        Ok(())
    }

    fn read_from(path: &Path) -> Result<Self, StoreError> {
        debug!(path = %path.display(), "Loading media store");

        let metadata = std::fs::metadata(path).map_err(|e| StoreError::Io(e.to_string()))?;
        if metadata.len() > MAX_STORE_FILE_SIZE {
            return Err(StoreError::StateTooLarge {
                size: metadata.len(),
                max: MAX_STORE_FILE_SIZE,
            });
        }

        let contents = std::fs::read_to_string(path).map_err(|e| StoreError::Io(e.to_string()))?;
        let document: StoreDocument = serde_json::from_str(&contents).map_err(|e| {
            warn!(error = %e, "Failed to deserialize media store");
            StoreError::Deserialization(e.to_string())
        })?;

        if document.schema_version != SCHEMA_VERSION {
            warn!(
                found_version = %document.schema_version,
                expected_version = SCHEMA_VERSION,
                "Media store schema version mismatch"
            );
            return Err(StoreError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: document.schema_version,
            });
        }

        Ok(document)
    }

    /// Load `path`, or start empty when it does not exist yet
    pub fn load_or_default(path: &Path) -> Result<Self, StoreError> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!(path = %path.display(), "No media store yet, starting empty");
            Ok(Self::default())
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File, StoreError> {
    let lock_path = StoreDocument::lock_path(path);
    if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
    }
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| StoreError::Lock(format!("Failed to create lock file: {e}")))
}
