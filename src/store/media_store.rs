//! JSON-file dedup store
//!
//! Reads are served from an in-memory copy of the document. Every mutation
//! takes the file lock, re-reads the document from disk, applies the change
//! and saves it before swapping the fresh copy in. Another handle on the same
//! file (a CLI next to a running daemon) therefore never has its changes
//! overwritten, and a failed save leaves both memory and disk untouched.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::{DedupStore, StoreDocument, StoreError, StoreResult, UpsertOutcome};
use crate::assets::remove_dir_if_empty;
use crate::identifier::MediaId;
use crate::{MediaRecord, SearchHistoryEntry};

/// Dedup store persisted as a single JSON document
#[derive(Debug)]
pub struct JsonMediaStore {
    path: PathBuf,
    document: Mutex<StoreDocument>,
}

impl JsonMediaStore {
    /// Open the store at `path`, starting empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let document = StoreDocument::load_or_default(&path)?;
        info!(
            path = %path.display(),
            records = document.records().len(),
            history = document.history().len(),
            "Media store opened"
        );
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, StoreDocument>> {
        self.document.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Apply `change` to the on-disk document and refresh the cached copy
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut StoreDocument) -> StoreResult<(T, bool)>,
    ) -> StoreResult<T> {
        let mut cached = self.lock()?;
        let (current, value) = StoreDocument::update(&self.path, change)?;
        *cached = current;
        Ok(value)
    }
}

impl DedupStore for JsonMediaStore {
    fn contains(&self, id: &MediaId) -> StoreResult<bool> {
        Ok(self.lock()?.get(id).is_some())
    }

    fn get(&self, id: &MediaId) -> StoreResult<Option<MediaRecord>> {
        Ok(self.lock()?.get(id).cloned())
    }

    fn upsert(&self, record: MediaRecord) -> StoreResult<UpsertOutcome> {
        if let Some(path) = record.local_path.as_ref().filter(|p| !p.is_file()) {
            return Err(StoreError::MissingAsset {
                id: record.id.clone(),
                path: path.clone(),
            });
        }

        let outcome = self.mutate(|document| {
            let outcome = match document.position(&record.id) {
                Some(index) if document.records()[index] == record => UpsertOutcome::Unchanged,
                Some(index) => {
                    document.records_mut()[index] = record.clone();
                    UpsertOutcome::Updated
                }
                None => {
                    document.records_mut().push(record.clone());
                    UpsertOutcome::Inserted
                }
            };
            Ok((outcome, outcome != UpsertOutcome::Unchanged))
        })?;

        match outcome {
            UpsertOutcome::Unchanged => debug!(id = %record.id, "Upsert of identical record skipped"),
            _ => debug!(id = %record.id, outcome = ?outcome, "Record persisted"),
        }
        Ok(outcome)
    }

    fn remove(&self, id: &MediaId) -> StoreResult<MediaRecord> {
        let mut staged = StagedRemoval::default();
        let removed = self.mutate(|document| {
            let index = document
                .position(id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            let record = document.records_mut().remove(index);

            for path in [record.local_path.as_ref(), record.thumbnail_path.as_ref()]
                .into_iter()
                .flatten()
            {
                staged.stage(path).map_err(|e| StoreError::AssetRemoval {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
            }
            Ok((record, true))
        });

        let record = match removed {
            Ok(record) => record,
            Err(e) => {
                staged.rollback();
                return Err(e);
            }
        };

        staged.finish();
        if let Some(dir) = record.local_path.as_ref().and_then(|p| p.parent()) {
            if dir.file_name().is_some_and(|name| name == id.as_str()) {
                remove_dir_if_empty(dir);
            }
        }

        info!(id = %id, "Media removed");
        Ok(record)
    }

    fn list(&self) -> StoreResult<Vec<MediaRecord>> {
        Ok(self.lock()?.records().to_vec())
    }

    fn record_search(&self, query: &str, result_count: usize) -> StoreResult<()> {
        self.mutate(|document| {
            document.push_history(SearchHistoryEntry::now(query, result_count));
            Ok(((), true))
        })
    }

    fn history(&self) -> StoreResult<Vec<SearchHistoryEntry>> {
        Ok(self.lock()?.history().to_vec())
    }

    fn reconcile(&self) -> StoreResult<usize> {
        let stale = self.mutate(|document| {
            let stale = document
                .records_mut()
                .iter_mut()
                .map(|r| r.clear_stale_paths())
                .filter(|changed| *changed)
                .count();
            Ok((stale, stale > 0))
        })?;

        if stale > 0 {
            warn!(stale, "Cleared local paths pointing at missing assets");
        }
        Ok(stale)
    }
}

/// Asset files renamed aside pending a committed removal
#[derive(Debug, Default)]
struct StagedRemoval {
    moves: Vec<(PathBuf, PathBuf)>,
}

impl StagedRemoval {
    /// Rename `path` aside; a file that is already gone counts as removed
    fn stage(&mut self, path: &Path) -> io::Result<()> {
        let staged = staging_path(path);
        match std::fs::rename(path, &staged) {
            Ok(()) => {
                self.moves.push((path.to_path_buf(), staged));
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Asset already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn rollback(&mut self) {
        for (original, staged) in self.moves.drain(..).rev() {
            if let Err(e) = std::fs::rename(&staged, &original) {
                warn!(
                    path = %original.display(),
                    error = %e,
                    "Failed to restore asset after aborted removal"
                );
            }
        }
    }

    fn finish(&mut self) {
        for (_, staged) in self.moves.drain(..) {
            if let Err(e) = std::fs::remove_file(&staged) {
                warn!(path = %staged.display(), error = %e, "Failed to delete staged asset");
            }
        }
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".deleting");
    path.with_file_name(name)
}
