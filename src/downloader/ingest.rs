//! Continuous ingestion loop
//!
//! One cycle is `Searching -> Diffing -> Downloading -> Sleeping(Steady)`.
//! An error in any state short-circuits to `Sleeping(Recovery)`, and every
//! sleep leads back to `Searching`. The loop only ends on shutdown.

use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::catalog::{CatalogClient, CatalogError};
use crate::downloader::config::IngestConfig;
use crate::shutdown::SharedShutdown;
use crate::store::{discard_unrecorded, DedupStore, StoreError};
use crate::MediaRecord;

/// Which sleep follows a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Clean cycle; long poll interval
    Steady,
    /// Failed cycle; short retry interval
    Recovery,
}

impl Cadence {
    /// Metrics label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Steady => "steady",
            Self::Recovery => "recovery",
        }
    }
}

/// Ingestion loop states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestState {
    /// Issue the configured search
    Searching,
    /// Drop results that are already materialized
    Diffing(Vec<MediaRecord>),
    /// Fetch and persist new items
    Downloading(Vec<MediaRecord>),
    /// Wait before the next search
    Sleeping(Cadence),
    /// Shutdown requested
    Stopped,
}

impl IngestState {
    fn name(&self) -> &'static str {
        match self {
            Self::Searching => "searching",
            Self::Diffing(_) => "diffing",
            Self::Downloading(_) => "downloading",
            Self::Sleeping(_) => "sleeping",
            Self::Stopped => "stopped",
        }
    }

    /// Whether a cycle ends in this state
    pub fn ends_cycle(&self) -> bool {
        matches!(self, Self::Sleeping(_) | Self::Stopped)
    }
}

/// Per-cycle counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Records returned by the search
    pub discovered: usize,
    /// Records not yet materialized
    pub new: usize,
    /// Records fetched and persisted
    pub downloaded: usize,
    /// Records whose fetch or persist failed
    pub failed: usize,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} discovered, {} new, {} downloaded, {} failed",
            self.discovered, self.new, self.downloaded, self.failed
        )
    }
}

/// How a cycle ended
#[derive(Debug)]
pub struct CycleOutcome {
    /// `Sleeping(_)` or `Stopped`
    pub next: IngestState,
    /// Counters for the cycle
    pub report: CycleReport,
    /// Error that sent the cycle to recovery, if any
    pub error: Option<IngestError>,
}

impl CycleOutcome {
    /// Cadence chosen for the following sleep; `None` when stopped
    pub fn cadence(&self) -> Option<Cadence> {
        match self.next {
            IngestState::Sleeping(cadence) => Some(cadence),
            _ => None,
        }
    }
}

/// Background search-diff-download loop
pub struct IngestLoop {
    catalog: Arc<CatalogClient>,
    store: Arc<dyn DedupStore>,
    config: IngestConfig,
    shutdown: SharedShutdown,
    cycles: AtomicU64,
}

impl IngestLoop {
    /// Create a loop
    ///
    /// # Errors
    /// [`IngestError::InvalidConfig`] when the configuration is inconsistent
    /// (including a recovery cadence that is not shorter than the steady one).
    pub fn new(
        catalog: Arc<CatalogClient>,
        store: Arc<dyn DedupStore>,
        config: IngestConfig,
        shutdown: SharedShutdown,
    ) -> Result<Self, IngestError> {
        config.validate().map_err(IngestError::InvalidConfig)?;
        Ok(Self {
            catalog,
            store,
            config,
            shutdown,
            cycles: AtomicU64::new(0),
        })
    }

    /// Loop configuration
    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Run until shutdown
    pub async fn run(&self) {
        info!(
            query = %self.config.query,
            max_results = self.config.max_results,
            steady_secs = self.config.steady_interval.as_secs(),
            recovery_secs = self.config.recovery_interval.as_secs(),
            "Ingestion loop started"
        );

        loop {
            let outcome = self.run_cycle().await;
            if outcome.next == IngestState::Stopped {
                break;
            }
            let mut report = outcome.report;
            if self.step(outcome.next, &mut report).await == IngestState::Stopped {
                break;
            }
        }

        info!(
            cycles = self.cycles.load(Ordering::Relaxed),
            "Ingestion loop stopped"
        );
    }

    /// Run one cycle from `Searching` up to (not including) the sleep
    pub async fn run_cycle(&self) -> CycleOutcome {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let span = info_span!("ingest_cycle", cycle);

        async {
            let mut report = CycleReport::default();
            let mut state = IngestState::Searching;
            let mut failure = None;

            while !state.ends_cycle() {
                state = match self.advance(state, &mut report).await {
                    Ok(next) => next,
                    Err(e) => {
                        error!(error = %e, "Cycle failed, entering recovery");
                        failure = Some(e);
                        IngestState::Sleeping(Cadence::Recovery)
                    }
                };
            }

            let outcome_label = match &state {
                IngestState::Sleeping(cadence) => cadence.label(),
                _ => "stopped",
            };
            crate::metrics::record_cycle(
                outcome_label,
                report.discovered,
                report.downloaded,
                report.failed,
            );
            info!(
                discovered = report.discovered,
                new = report.new,
                downloaded = report.downloaded,
                failed = report.failed,
                next = outcome_label,
                "Cycle finished: {report}"
            );

            CycleOutcome {
                next: state,
                report,
                error: failure,
            }
        }
        .instrument(span)
        .await
    }

    /// Perform one state transition
    ///
    /// Errors are logged and mapped to `Sleeping(Recovery)`.
    pub async fn step(&self, state: IngestState, report: &mut CycleReport) -> IngestState {
        match self.advance(state, report).await {
            Ok(next) => next,
            Err(e) => {
                error!(error = %e, "Ingestion step failed, entering recovery");
                IngestState::Sleeping(Cadence::Recovery)
            }
        }
    }

    async fn advance(
        &self,
        state: IngestState,
        report: &mut CycleReport,
    ) -> Result<IngestState, IngestError> {
        debug!(state = state.name(), "Ingestion state");
        if self.shutdown.is_shutdown_requested() {
            return Ok(IngestState::Stopped);
        }

        match state {
            IngestState::Searching => self.search().await,
            IngestState::Diffing(records) => self.diff(records, report),
            IngestState::Downloading(records) => self.download(records, report).await,
            IngestState::Sleeping(cadence) => Ok(self.sleep(cadence).await),
            IngestState::Stopped => Ok(IngestState::Stopped),
        }
    }

    async fn search(&self) -> Result<IngestState, IngestError> {
        let records = match self
            .catalog
            .search(&self.config.query, self.config.max_results)
            .await
        {
            Ok(records) => records,
            Err(e) if e.is_cancelled() => return Ok(IngestState::Stopped),
            Err(e) => return Err(e.into()),
        };

        self.store.record_search(&self.config.query, records.len())?;
        Ok(IngestState::Diffing(records))
    }

    fn diff(
        &self,
        records: Vec<MediaRecord>,
        report: &mut CycleReport,
    ) -> Result<IngestState, IngestError> {
        report.discovered = records.len();

        let mut fresh = Vec::with_capacity(records.len());
        for record in records {
            if self.store.is_materialized(&record.id)? {
                debug!(id = %record.id, "Already downloaded, skipping");
            } else {
                fresh.push(record);
            }
        }
        report.new = fresh.len();

        if fresh.is_empty() {
            info!("No new media this cycle");
            return Ok(IngestState::Sleeping(Cadence::Steady));
        }
        info!(new = fresh.len(), "New media discovered");
        Ok(IngestState::Downloading(fresh))
    }

    async fn download(
        &self,
        records: Vec<MediaRecord>,
        report: &mut CycleReport,
    ) -> Result<IngestState, IngestError> {
        let catalog = &self.catalog;
        let mut results = stream::iter(records)
            .map(|record| async move {
                let result = catalog.fetch(&record).await;
                (record, result)
            })
            .buffer_unordered(self.config.download_concurrency.max(1));

        let mut storage_error = None;
        let mut cancelled = false;

        while let Some((record, result)) = results.next().await {
            match result {
                Ok(fetched) => match self.store.upsert(fetched.clone()) {
                    Ok(_) => {
                        report.downloaded += 1;
                        info!(id = %record.id, title = %record.title, "Media downloaded");
                    }
                    Err(e) => {
                        report.failed += 1;
                        error!(id = %record.id, error = %e, "Failed to persist downloaded media");
                        discard_unrecorded(self.store.as_ref(), catalog.layout(), &fetched);
                        storage_error.get_or_insert(e);
                    }
                },
                Err(e) if e.is_cancelled() => cancelled = true,
                Err(e) => {
                    report.failed += 1;
                    warn!(id = %record.id, error = %e, "Download failed, continuing");
                }
            }
        }

        if cancelled {
            return Ok(IngestState::Stopped);
        }
        match storage_error {
            Some(e) => Err(e.into()),
            None => Ok(IngestState::Sleeping(Cadence::Steady)),
        }
    }

    async fn sleep(&self, cadence: Cadence) -> IngestState {
        let duration = self.interval(cadence);
        info!(
            cadence = cadence.label(),
            secs = duration.as_secs(),
            "Sleeping until next search"
        );
        if self.shutdown.sleep(duration).await {
            IngestState::Searching
        } else {
            IngestState::Stopped
        }
    }

    fn interval(&self, cadence: Cadence) -> Duration {
        match cadence {
            Cadence::Steady => self.config.steady_interval,
            Cadence::Recovery => self.config.recovery_interval,
        }
    }
}

impl fmt::Debug for IngestLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestLoop")
            .field("config", &self.config)
            .field("cycles", &self.cycles.load(Ordering::Relaxed))
            .finish()
    }
}

/// Ingestion loop errors
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Search could not be completed
    #[error("search error: {0}")]
    Search(#[from] CatalogError),

    /// Store read or write failed
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Rejected configuration
    #[error("invalid ingest configuration: {0}")]
    InvalidConfig(String),
}
