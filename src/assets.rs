//! On-disk layout for downloaded assets
//!
//! Every item gets its own directory keyed by id:
//!
//! ```text
//! {data_dir}/media/{id}/{id}.mp4
//! {data_dir}/media/{id}/{id}.webp
//! ```
//!
//! Paths are deterministic and collision-free because [`MediaId`] is a single
//! safe path component.
//!
//! Fetches never write into an item directory directly. Each attempt gets a
//! private [`StagingArea`] under `{data_dir}/.staging/`, and only a finished
//! asset is renamed into `media/{id}/`. A failed attempt discards its own
//! staging directory and nothing else, so files a committed record points
//! at are never touched.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::identifier::MediaId;

/// Directory under the data root that holds asset directories
pub const MEDIA_DIR: &str = "media";

/// Directory under the data root that holds in-flight fetches
pub const STAGING_DIR: &str = ".staging";

/// Extensions recognized as thumbnails, in preference order
pub const THUMBNAIL_EXTENSIONS: &[&str] = &["webp", "jpg", "jpeg", "png"];

/// Extensions recognized as the primary asset, in preference order
pub const MEDIA_EXTENSIONS: &[&str] = &["mp4", "webm", "mkv", "mov", "m4a", "mp3", "opus"];

/// Deterministic asset paths rooted at a data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetLayout {
    root: PathBuf,
}

impl AssetLayout {
    /// Layout rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: data_dir.into(),
        }
    }

    /// Data root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every item's directory
    pub fn media_root(&self) -> PathBuf {
        self.root.join(MEDIA_DIR)
    }

    /// Directory for one item
    pub fn item_dir(&self, id: &MediaId) -> PathBuf {
        self.media_root().join(id.as_str())
    }

    /// Path for one item's file with the given extension
    pub fn item_file(&self, id: &MediaId, extension: &str) -> PathBuf {
        self.item_dir(id).join(format!("{}.{}", id.as_str(), extension))
    }

    /// Output template handed to the downloader (`%(ext)s` is filled in by it)
    pub fn output_template(&self, id: &MediaId) -> PathBuf {
        self.item_dir(id).join(format!("{}.%(ext)s", id.as_str()))
    }

    /// Directory holding in-flight fetches
    pub fn staging_root(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Create a private staging area for one fetch attempt of `id`
    pub fn stage(&self, id: &MediaId) -> io::Result<StagingArea> {
        let root = self.staging_root();
        std::fs::create_dir_all(&root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}.", id.as_str()))
            .tempdir_in(&root)?;
        let layout = AssetLayout::new(dir.path());
        layout.prepare(id)?;
        Ok(StagingArea {
            id: id.clone(),
            dir,
            layout,
        })
    }

    /// Create the item directory
    pub fn prepare(&self, id: &MediaId) -> io::Result<PathBuf> {
        let dir = self.item_dir(id);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// First existing primary asset for `id`
    pub fn find_media(&self, id: &MediaId) -> Option<PathBuf> {
        self.find_with(id, MEDIA_EXTENSIONS)
    }

    /// First existing thumbnail for `id`
    pub fn find_thumbnail(&self, id: &MediaId) -> Option<PathBuf> {
        self.find_with(id, THUMBNAIL_EXTENSIONS)
    }

    /// Whether `path` lies inside this item's directory
    pub fn owns(&self, id: &MediaId, path: &Path) -> bool {
        path.starts_with(self.item_dir(id))
    }

    /// Delete one of `id`'s files, then its directory if that left it empty
    ///
    /// A file that is already gone is not an error.
    pub fn discard_file(&self, id: &MediaId, path: &Path) -> io::Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(id = %id, path = %path.display(), "Discarded asset file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        remove_dir_if_empty(&self.item_dir(id));
        Ok(())
    }

    fn find_with(&self, id: &MediaId, extensions: &[&str]) -> Option<PathBuf> {
        extensions
            .iter()
            .map(|ext| self.item_file(id, ext))
            .find(|path| path.is_file())
    }
}

/// Remove `dir` when nothing is left in it
pub fn remove_dir_if_empty(dir: &Path) {
    if let Err(e) = std::fs::remove_dir(dir) {
        debug!(dir = %dir.display(), error = %e, "Item directory kept");
    }
}

/// Private directory one fetch attempt writes into
///
/// Dropping it deletes everything that was not promoted.
#[derive(Debug)]
pub struct StagingArea {
    id: MediaId,
    dir: TempDir,
    layout: AssetLayout,
}

impl StagingArea {
    /// Layout handed to the backend; its item directory already exists
    pub fn layout(&self) -> &AssetLayout {
        &self.layout
    }

    /// Whether `path` is a file this attempt produced
    pub fn holds(&self, path: &Path) -> bool {
        path.is_file() && self.layout.owns(&self.id, path)
    }

    /// Rename a staged file into `target`'s item directory
    ///
    /// Returns the final path. An existing file of the same name is replaced
    /// atomically, so a reader never sees it missing.
    pub fn promote(&self, target: &AssetLayout, staged: &Path) -> io::Result<PathBuf> {
        let name = staged.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no file name", staged.display()),
            )
        })?;
        let dest = target.prepare(&self.id)?.join(name);
        std::fs::rename(staged, &dest)?;
        Ok(dest)
    }

    /// Delete the staging directory and whatever is still in it
    pub fn discard(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(id = %self.id, dir = %path.display(), error = %e, "Failed to discard staged fetch");
        }
    }
}
