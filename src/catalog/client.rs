//! Rate-limited, proxy-routed catalog client
//!
//! Every attempt acquires a fresh proxy (best effort), passes through the
//! shared [`RateLimiter`], calls the backend and reports the outcome. Failed
//! attempts are retried with a new proxy while the failure is retryable.
//! Local disk failures bypass the limiter entirely.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::failure::AttemptContext;
use super::{
    BackendError, CatalogBackend, CatalogConfig, CatalogError, CatalogResult, FailureKind,
    FetchedAsset,
};
use crate::assets::{AssetLayout, StagingArea};
use crate::downloader::RateLimiter;
use crate::metrics::CatalogCallMetrics;
use crate::proxy::{ProxyHandle, ProxySource};
use crate::MediaRecord;

/// Catalog client shared by the ingestion loop and the service layer
pub struct CatalogClient {
    backend: Arc<dyn CatalogBackend>,
    proxies: Arc<dyn ProxySource>,
    limiter: Arc<RateLimiter>,
    config: CatalogConfig,
}

impl CatalogClient {
    /// Create a client
    pub fn new(
        backend: Arc<dyn CatalogBackend>,
        proxies: Arc<dyn ProxySource>,
        limiter: Arc<RateLimiter>,
        config: CatalogConfig,
    ) -> Self {
        Self {
            backend,
            proxies,
            limiter,
            config,
        }
    }

    /// Shared limiter gating every call
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Asset layout fetches write into
    pub fn layout(&self) -> &AssetLayout {
        &self.config.layout
    }

    /// Search the catalog
    ///
    /// Returns at most `max_results` metadata-only records in source order,
    /// without duplicate ids.
    ///
    /// # Errors
    /// [`CatalogError::SearchFailed`] once attempts are exhausted or the
    /// failure is not retryable; [`CatalogError::RateLimit`] on shutdown.
    pub async fn search(&self, query: &str, max_results: usize) -> CatalogResult<Vec<MediaRecord>> {
        let span = info_span!("catalog_search", query = %query, max_results);
        async {
            let max_attempts = self.config.max_attempts.max(1);
            let mut attempt = 0;
            loop {
                attempt += 1;
                let proxy = self.proxies.next().await;
                self.limiter.admit().await?;

                let call = CatalogCallMetrics::start("search");
                match self.backend.search(query, max_results, proxy.as_ref()).await {
                    Ok(records) => {
                        self.limiter.report_outcome(true).await;
                        call.record_success();
                        let records = dedupe_truncate(records, max_results);
                        info!(returned = records.len(), attempt, "Search completed");
                        return Ok(records);
                    }
                    Err(e) => {
                        call.record_failure(e.kind);
                        let ctx = AttemptContext {
                            operation: "search",
                            subject: query,
                            attempt,
                            max_attempts,
                            kind: e.kind,
                            via_proxy: proxy.is_some(),
                        };
                        if !self.retry_after_failure(&ctx, &e).await {
                            return Err(CatalogError::SearchFailed {
                                query: query.to_string(),
                                kind: e.kind,
                                message: e.message,
                            });
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Download one item
    ///
    /// Returns a copy of `record` with `local_path`, `thumbnail_path` and
    /// `fetched_at` populated. Each attempt writes into its own staging
    /// area; only a finished asset is moved into the item directory, so a
    /// failure never touches files an existing record points at.
    ///
    /// # Errors
    /// [`CatalogError::FetchFailed`] once attempts are exhausted, the
    /// failure is not retryable, or the asset cannot be stored locally;
    /// [`CatalogError::RateLimit`] on shutdown.
    pub async fn fetch(&self, record: &MediaRecord) -> CatalogResult<MediaRecord> {
        let span = info_span!("catalog_fetch", id = %record.id);
        async {
            let layout = &self.config.layout;
            let max_attempts = self.config.max_attempts.max(1);
            let mut attempt = 0;
            loop {
                attempt += 1;
                let staging = layout.stage(&record.id).map_err(|e| {
                    local_failure(
                        record,
                        format!("cannot stage under {}: {e}", layout.staging_root().display()),
                    )
                })?;

                let result = self.fetch_once(record, &staging, attempt, max_attempts).await;
                let (err, via_proxy) = match result {
                    Ok(asset) => return self.promote(record, staging, asset),
                    Err(FetchAttempt::Cancelled(e)) => {
                        staging.discard();
                        return Err(e.into());
                    }
                    Err(FetchAttempt::Failed { error, via_proxy }) => (error, via_proxy),
                };

                staging.discard();
                let ctx = AttemptContext {
                    operation: "fetch",
                    subject: record.id.as_str(),
                    attempt,
                    max_attempts,
                    kind: err.kind,
                    via_proxy,
                };
                if !self.retry_after_failure(&ctx, &err).await {
                    return Err(CatalogError::FetchFailed {
                        id: record.id.clone(),
                        kind: err.kind,
                        message: err.message,
                    });
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn fetch_once(
        &self,
        record: &MediaRecord,
        staging: &StagingArea,
        attempt: u32,
        max_attempts: u32,
    ) -> Result<FetchedAsset, FetchAttempt> {
        let proxy: Option<ProxyHandle> = self.proxies.next().await;
        self.limiter.admit().await.map_err(FetchAttempt::Cancelled)?;

        let call = CatalogCallMetrics::start("fetch");
        let outcome = self
            .backend
            .fetch(record, staging.layout(), proxy.as_ref())
            .await
            .and_then(|asset| {
                if staging.holds(&asset.media_path) {
                    Ok(asset)
                } else {
                    Err(BackendError::new(
                        FailureKind::MissingAsset,
                        format!("reported asset {} is not present", asset.media_path.display()),
                    ))
                }
            });

        match outcome {
            Ok(asset) => {
                self.limiter.report_outcome(true).await;
                call.record_success();
                debug!(attempt, max_attempts, "Fetch attempt succeeded");
                Ok(asset)
            }
            Err(error) => {
                call.record_failure(error.kind);
                Err(FetchAttempt::Failed {
                    error,
                    via_proxy: proxy.is_some(),
                })
            }
        }
    }

    /// Move a staged asset into the item directory
    ///
    /// The primary asset is moved first; a thumbnail that cannot be moved is
    /// dropped rather than failing the fetch.
    fn promote(
        &self,
        record: &MediaRecord,
        staging: StagingArea,
        asset: FetchedAsset,
    ) -> CatalogResult<MediaRecord> {
        let layout = &self.config.layout;
        let media = staging.promote(layout, &asset.media_path);
        let thumbnail = match (&media, asset.thumbnail_path.filter(|p| staging.holds(p))) {
            (Ok(_), Some(staged)) => match staging.promote(layout, &staged) {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(path = %staged.display(), error = %e, "Failed to keep thumbnail");
                    None
                }
            },
            _ => None,
        };
        staging.discard();

        let media = media.map_err(|e| {
            local_failure(
                record,
                format!("cannot move asset into {}: {e}", layout.item_dir(&record.id).display()),
            )
        })?;
        info!(path = %media.display(), "Fetch completed");

        let mut fetched = record.clone();
        fetched.local_path = Some(media);
        fetched.thumbnail_path = thumbnail;
        fetched.fetched_at = Some(Utc::now());
        Ok(fetched)
    }

    /// Report a failed attempt to the limiter and decide whether to go again
    async fn retry_after_failure(&self, ctx: &AttemptContext<'_>, err: &BackendError) -> bool {
        let backoff = self.limiter.report_outcome(false).await;
        if ctx.kind.is_quota_related() {
            warn!(kind = ctx.kind.label(), "Source signalled throttling");
        }

        if ctx.kind.is_retryable() && ctx.attempt < ctx.max_attempts {
            warn!(error = %err.message, "{}", ctx.format_retry(backoff));
            true
        } else {
            error!("{}", ctx.format_failure(&err.message));
            false
        }
    }
}

impl std::fmt::Debug for CatalogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogClient")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}

enum FetchAttempt {
    Cancelled(crate::downloader::RateLimitError),
    Failed { error: BackendError, via_proxy: bool },
}

/// Disk failure on our side; the source was not at fault, so the limiter is
/// left alone and the fetch is not retried
fn local_failure(record: &MediaRecord, message: String) -> CatalogError {
    error!(id = %record.id, error = %message, "Fetched asset could not be stored");
    CatalogError::FetchFailed {
        id: record.id.clone(),
        kind: FailureKind::Storage,
        message,
    }
}

fn dedupe_truncate(records: Vec<MediaRecord>, max_results: usize) -> Vec<MediaRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.id.clone()))
        .take(max_results)
        .collect()
}
