//! Integration tests for the ingestion loop

use std::sync::Arc;
use std::time::Duration;

use media_ingest::catalog::FailureKind;
use media_ingest::downloader::{Cadence, CycleReport, IngestConfig, IngestError, IngestLoop};
use media_ingest::store::{DedupStore, JsonMediaStore, StoreError, StoreResult, UpsertOutcome};
use media_ingest::{MediaId, MediaRecord, SearchHistoryEntry};

use crate::support::{id, records, Harness};

fn ids(records: &[MediaRecord]) -> Vec<&str> {
    records.iter().map(|r| r.id.as_str()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_first_cycle_downloads_every_result() {
    let h = Harness::new();
    h.backend.push_search(records(&["A", "B"]));

    let outcome = h.ingest(IngestConfig::default()).run_cycle().await;

    assert_eq!(outcome.cadence(), Some(Cadence::Steady));
    assert!(outcome.error.is_none());
    assert_eq!(
        outcome.report,
        CycleReport {
            discovered: 2,
            new: 2,
            downloaded: 2,
            failed: 0
        }
    );

    let stored = h.store.list().unwrap();
    assert_eq!(ids(&stored), vec!["A", "B"]);
    for record in &stored {
        assert!(record.asset_exists(), "{} has no asset on disk", record.id);
        assert!(record.fetched_at.is_some());
    }

    let history = h.store.history().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].query, "ashley got");
    assert_eq!(history[0].result_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_next_cycle_downloads_only_new_results() {
    let h = Harness::new();
    h.backend.push_search(records(&["A", "B"]));
    h.backend.push_search(records(&["A", "B", "C"]));
    let ingest = h.ingest(IngestConfig::default());

    ingest.run_cycle().await;
    let outcome = ingest.run_cycle().await;

    assert_eq!(outcome.report.discovered, 3);
    assert_eq!(outcome.report.new, 1);
    assert_eq!(outcome.report.downloaded, 1);
    assert_eq!(h.backend.fetched(), vec!["A", "B", "C"]);
    assert_eq!(ids(&h.store.list().unwrap()), vec!["A", "B", "C"]);
    assert_eq!(h.store.history().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_results_fetch_nothing() {
    let h = Harness::new();
    h.backend.push_search(records(&["A", "B"]));
    let ingest = h.ingest(IngestConfig::default());

    ingest.run_cycle().await;
    let before = std::fs::read_to_string(h.store_path()).unwrap();
    let outcome = ingest.run_cycle().await;

    assert_eq!(outcome.cadence(), Some(Cadence::Steady));
    assert_eq!(outcome.report.new, 0);
    assert_eq!(h.backend.fetched().len(), 2);

    // Only the history grew.
    let after: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(h.store_path()).unwrap()).unwrap();
    let before: serde_json::Value = serde_json::from_str(&before).unwrap();
    assert_eq!(after["records"], before["records"]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_fetch_leaves_no_trace_and_is_retried_next_cycle() {
    let h = Harness::new();
    h.backend.push_search(records(&["A", "B"]));
    h.backend.fail_fetch("B");
    let ingest = h.ingest(IngestConfig::default());

    let outcome = ingest.run_cycle().await;

    // A per-item failure does not fail the cycle.
    assert_eq!(outcome.cadence(), Some(Cadence::Steady));
    assert_eq!(outcome.report.downloaded, 1);
    assert_eq!(outcome.report.failed, 1);
    assert!(h.store.is_materialized(&id("A")).unwrap());
    assert!(!h.store.contains(&id("B")).unwrap());
    assert!(!h.catalog.layout().item_dir(&id("B")).exists());

    h.backend.heal_fetch("B");
    let outcome = ingest.run_cycle().await;
    assert_eq!(outcome.report.new, 1);
    assert_eq!(outcome.report.downloaded, 1);
    assert_eq!(h.backend.fetched(), vec!["A", "B", "B"]);
    assert!(h.store.is_materialized(&id("B")).unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_search_failure_enters_recovery() {
    let h = Harness::new();
    h.backend.push_search_error(FailureKind::Offline);

    let outcome = h.ingest(IngestConfig::default()).run_cycle().await;

    assert_eq!(outcome.cadence(), Some(Cadence::Recovery));
    assert!(matches!(outcome.error, Some(IngestError::Search(_))));
    // Retryable failures use every attempt before giving up.
    assert_eq!(h.backend.search_calls(), 3);
    assert!(h.store.history().unwrap().is_empty());
    assert!(h.backend.fetched().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stale_record_is_downloaded_again() {
    let h = Harness::new();
    let layout = h.catalog.layout().clone();
    layout.prepare(&id("A")).unwrap();
    let media = layout.item_file(&id("A"), "mp4");
    std::fs::write(&media, b"old").unwrap();

    let mut stale = crate::support::record("A");
    stale.local_path = Some(media.clone());
    assert_eq!(h.store.upsert(stale).unwrap(), UpsertOutcome::Inserted);
    std::fs::remove_file(&media).unwrap();

    h.backend.push_search(records(&["A"]));
    let outcome = h.ingest(IngestConfig::default()).run_cycle().await;

    assert_eq!(outcome.report.new, 1);
    assert_eq!(outcome.report.downloaded, 1);
    assert!(h.store.is_materialized(&id("A")).unwrap());
    assert_eq!(h.store.list().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_every_call_passes_through_the_limiter() {
    let h = Harness::new();
    h.backend.push_search(records(&["A", "B"]));

    h.ingest(IngestConfig::default()).run_cycle().await;

    // One search plus two downloads.
    let stats = h.catalog.limiter().stats().await;
    assert_eq!(stats.calls_last_minute, 3);
    assert_eq!(stats.calls_last_hour, 3);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_downloads_persist_every_item() {
    let h = Harness::new();
    h.backend.push_search(records(&["A", "B", "C", "D"]));
    let config = IngestConfig::default()
        .with_max_results(4)
        .with_download_concurrency(4);

    let outcome = h.ingest(config).run_cycle().await;

    assert_eq!(outcome.report.downloaded, 4);
    let mut stored: Vec<String> = h
        .store
        .list()
        .unwrap()
        .into_iter()
        .map(|r| r.id.to_string())
        .collect();
    stored.sort();
    assert_eq!(stored, vec!["A", "B", "C", "D"]);
}

#[test]
fn test_recovery_must_be_shorter_than_steady() {
    let h = Harness::new();
    let config = IngestConfig::default()
        .with_intervals(Duration::from_secs(300), Duration::from_secs(300));
    let result = IngestLoop::new(h.catalog.clone(), h.dyn_store(), config, h.shutdown.clone());
    assert!(matches!(result, Err(IngestError::InvalidConfig(_))));
}

#[tokio::test(start_paused = true)]
async fn test_loop_polls_on_the_steady_cadence() {
    let h = Harness::new();
    h.backend.push_search(records(&["A"]));
    let ingest = Arc::new(h.ingest(IngestConfig::default()));

    let task = tokio::spawn({
        let ingest = ingest.clone();
        async move { ingest.run().await }
    });

    // Searches at t=0, 30 min and 60 min.
    tokio::time::sleep(Duration::from_secs(2 * 1800 + 1)).await;
    h.shutdown.request_shutdown();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("loop did not stop on shutdown")
        .unwrap();

    assert_eq!(h.backend.search_calls(), 3);
    assert_eq!(h.backend.fetched(), vec!["A"]);
}

#[tokio::test(start_paused = true)]
async fn test_loop_retries_sooner_after_a_failed_cycle() {
    let h = Harness::new();
    for _ in 0..3 {
        h.backend.push_search_error(FailureKind::Offline);
    }
    h.backend.push_search(records(&["A"]));
    let ingest = Arc::new(h.ingest(IngestConfig::default()));

    let task = tokio::spawn({
        let ingest = ingest.clone();
        async move { ingest.run().await }
    });

    // The failed cycle ends after its backoffs; recovery is 5 min, well
    // short of the 30 min steady cadence.
    tokio::time::sleep(Duration::from_secs(400)).await;
    h.shutdown.request_shutdown();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("loop did not stop on shutdown")
        .unwrap();

    assert_eq!(h.backend.search_calls(), 4);
    assert!(h.store.is_materialized(&id("A")).unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_the_steady_sleep() {
    let h = Harness::new();
    let ingest = Arc::new(h.ingest(IngestConfig::default()));

    let task = tokio::spawn({
        let ingest = ingest.clone();
        async move { ingest.run().await }
    });

    tokio::time::sleep(Duration::from_secs(10)).await;
    let started = tokio::time::Instant::now();
    h.shutdown.request_shutdown();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("loop did not stop on shutdown")
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(h.backend.search_calls(), 1);
}

/// Store that accepts history but refuses every record
struct RejectingStore(JsonMediaStore);

impl DedupStore for RejectingStore {
    fn contains(&self, id: &MediaId) -> StoreResult<bool> {
        self.0.contains(id)
    }

    fn get(&self, id: &MediaId) -> StoreResult<Option<MediaRecord>> {
        self.0.get(id)
    }

    fn upsert(&self, _record: MediaRecord) -> StoreResult<UpsertOutcome> {
        Err(StoreError::Io("No space left on device".to_string()))
    }

    fn remove(&self, id: &MediaId) -> StoreResult<MediaRecord> {
        self.0.remove(id)
    }

    fn list(&self) -> StoreResult<Vec<MediaRecord>> {
        self.0.list()
    }

    fn record_search(&self, query: &str, result_count: usize) -> StoreResult<()> {
        self.0.record_search(query, result_count)
    }

    fn history(&self) -> StoreResult<Vec<SearchHistoryEntry>> {
        self.0.history()
    }

    fn reconcile(&self) -> StoreResult<usize> {
        self.0.reconcile()
    }
}

#[tokio::test(start_paused = true)]
async fn test_storage_failure_enters_recovery_and_discards_the_asset() {
    let h = Harness::new();
    h.backend.push_search(records(&["A"]));
    let store = Arc::new(RejectingStore(
        JsonMediaStore::open(h.dir.path().join("rejecting.json")).unwrap(),
    ));
    let ingest = IngestLoop::new(
        h.catalog.clone(),
        store.clone(),
        IngestConfig::default(),
        h.shutdown.clone(),
    )
    .unwrap();

    let outcome = ingest.run_cycle().await;

    assert_eq!(outcome.cadence(), Some(Cadence::Recovery));
    assert!(matches!(outcome.error, Some(IngestError::Storage(_))));
    assert_eq!(outcome.report.failed, 1);
    // Nothing on disk that the store does not know about.
    assert!(!h.catalog.layout().item_dir(&id("A")).exists());
    assert!(store.list().unwrap().is_empty());
}
