//! Shared fixtures: an in-process catalog backend, a fixed proxy source and
//! a harness wiring them to a temp data directory.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use media_ingest::assets::AssetLayout;
use media_ingest::catalog::{
    BackendError, CatalogBackend, CatalogClient, CatalogConfig, FailureKind, FetchedAsset,
};
use media_ingest::downloader::{IngestConfig, IngestLoop, RateLimitConfig, RateLimiter};
use media_ingest::proxy::{DirectConnection, ProxyHandle, ProxySource};
use media_ingest::service::MediaService;
use media_ingest::shutdown::{SharedShutdown, ShutdownCoordinator};
use media_ingest::store::{DedupStore, JsonMediaStore, STORE_FILE_NAME};
use media_ingest::{MediaId, MediaRecord};

pub fn id(raw: &str) -> MediaId {
    MediaId::parse(raw).unwrap()
}

pub fn record(raw: &str) -> MediaRecord {
    MediaRecord::new(
        id(raw),
        format!("Title {raw}"),
        format!("https://www.youtube.com/watch?v={raw}"),
    )
}

pub fn records(ids: &[&str]) -> Vec<MediaRecord> {
    ids.iter().map(|raw| record(raw)).collect()
}

/// Catalog backend serving scripted search results and writing fake assets
///
/// Queued search results are consumed in order; the last one is repeated
/// once the queue is down to a single entry.
#[derive(Default)]
pub struct FakeCatalog {
    searches: Mutex<VecDeque<Result<Vec<MediaRecord>, BackendError>>>,
    failing: Mutex<HashSet<String>>,
    fetched: Mutex<Vec<String>>,
    proxies_seen: Mutex<Vec<Option<String>>>,
    search_calls: AtomicUsize,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_search(&self, results: Vec<MediaRecord>) {
        self.searches.lock().unwrap().push_back(Ok(results));
    }

    pub fn push_search_error(&self, kind: FailureKind) {
        self.searches
            .lock()
            .unwrap()
            .push_back(Err(BackendError::new(kind, "scripted search failure")));
    }

    pub fn fail_fetch(&self, raw: &str) {
        self.failing.lock().unwrap().insert(raw.to_string());
    }

    pub fn heal_fetch(&self, raw: &str) {
        self.failing.lock().unwrap().remove(raw);
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn proxies_seen(&self) -> Vec<Option<String>> {
        self.proxies_seen.lock().unwrap().clone()
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogBackend for FakeCatalog {
    async fn search(
        &self,
        _query: &str,
        max_results: usize,
        proxy: Option<&ProxyHandle>,
    ) -> Result<Vec<MediaRecord>, BackendError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.proxies_seen
            .lock()
            .unwrap()
            .push(proxy.map(|p| p.to_string()));

        let mut searches = self.searches.lock().unwrap();
        let next = if searches.len() > 1 {
            searches.pop_front()
        } else {
            searches.front().cloned()
        };
        next.unwrap_or_else(|| Ok(Vec::new()))
            .map(|mut results| {
                results.truncate(max_results);
                results
            })
    }

    async fn fetch(
        &self,
        record: &MediaRecord,
        layout: &AssetLayout,
        proxy: Option<&ProxyHandle>,
    ) -> Result<FetchedAsset, BackendError> {
        self.fetched.lock().unwrap().push(record.id.to_string());
        self.proxies_seen
            .lock()
            .unwrap()
            .push(proxy.map(|p| p.to_string()));

        std::fs::write(layout.item_file(&record.id, "mp4.part"), b"partial").unwrap();
        if self.failing.lock().unwrap().contains(record.id.as_str()) {
            return Err(BackendError::new(
                FailureKind::Unavailable,
                "ERROR: Video unavailable",
            ));
        }

        std::fs::remove_file(layout.item_file(&record.id, "mp4.part")).unwrap();
        let media_path = layout.item_file(&record.id, "mp4");
        let thumbnail_path = layout.item_file(&record.id, "webp");
        std::fs::write(&media_path, b"video bytes").unwrap();
        std::fs::write(&thumbnail_path, b"thumb bytes").unwrap();
        Ok(FetchedAsset {
            media_path,
            thumbnail_path: Some(thumbnail_path),
        })
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Proxy source that always hands out the same address
pub struct FixedProxy(pub &'static str);

#[async_trait]
impl ProxySource for FixedProxy {
    async fn next(&self) -> Option<ProxyHandle> {
        ProxyHandle::parse(self.0).ok()
    }
}

/// Catalog client, store and shutdown wired to a temp data directory
pub struct Harness {
    pub dir: TempDir,
    pub backend: Arc<FakeCatalog>,
    pub catalog: Arc<CatalogClient>,
    pub store: Arc<JsonMediaStore>,
    pub shutdown: SharedShutdown,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_proxies(Arc::new(DirectConnection))
    }

    pub fn with_proxies(proxies: Arc<dyn ProxySource>) -> Self {
        let dir = TempDir::new().unwrap();
        let shutdown = ShutdownCoordinator::shared();
        let backend = Arc::new(FakeCatalog::new());
        let limiter = Arc::new(
            RateLimiter::new(RateLimitConfig::with_limits(100, 1000))
                .unwrap()
                .with_shutdown(shutdown.clone()),
        );
        let catalog = Arc::new(CatalogClient::new(
            backend.clone(),
            proxies,
            limiter,
            CatalogConfig::new(dir.path()),
        ));
        let store = Arc::new(JsonMediaStore::open(dir.path().join(STORE_FILE_NAME)).unwrap());

        Self {
            dir,
            backend,
            catalog,
            store,
            shutdown,
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.dir.path().join(STORE_FILE_NAME)
    }

    pub fn dyn_store(&self) -> Arc<dyn DedupStore> {
        self.store.clone()
    }

    pub fn ingest(&self, config: IngestConfig) -> IngestLoop {
        IngestLoop::new(
            self.catalog.clone(),
            self.dyn_store(),
            config,
            self.shutdown.clone(),
        )
        .unwrap()
    }

    pub fn service(&self) -> MediaService {
        MediaService::new(self.catalog.clone(), self.dyn_store())
    }
}
