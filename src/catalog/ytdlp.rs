//! yt-dlp backed catalog driver
//!
//! Searches run `ytsearchN:` as a flat playlist dump (metadata only, one JSON
//! object per line). Fetches download a single item into its asset directory
//! and print the final path after post-processing.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::failure::{classify_diagnostics, tail_lines};
use super::parser::parse_listing;
use super::{BackendError, CatalogBackend, CatalogConfig, FailureKind, FetchedAsset};
use crate::assets::AssetLayout;
use crate::proxy::ProxyHandle;
use crate::MediaRecord;

/// Diagnostics lines kept in error messages
const DIAGNOSTIC_LINES: usize = 3;

/// Captured result of one backend invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the process exited successfully
    pub success: bool,
    /// Exit status as text, for messages
    pub status: String,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

/// Catalog backend that shells out to yt-dlp
#[derive(Debug, Clone)]
pub struct YtDlpBackend {
    program: PathBuf,
    format: String,
    watch_url_base: String,
    search_timeout: Duration,
    fetch_timeout: Duration,
}

impl YtDlpBackend {
    /// Create a backend from catalog settings
    pub fn new(config: &CatalogConfig) -> Self {
        Self {
            program: config.program.clone(),
            format: config.format.clone(),
            watch_url_base: config.watch_url_base.clone(),
            search_timeout: config.search_timeout,
            fetch_timeout: config.fetch_timeout,
        }
    }

    /// Arguments for a metadata-only search
    pub fn search_args(
        &self,
        query: &str,
        max_results: usize,
        proxy: Option<&ProxyHandle>,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--flat-playlist".into(),
            "--dump-json".into(),
            "--no-warnings".into(),
        ];
        push_proxy(&mut args, proxy);
        args.push(format!("ytsearch{max_results}:{query}").into());
        args
    }

    /// Arguments for downloading one item with its thumbnail
    pub fn fetch_args(
        &self,
        record: &MediaRecord,
        output_template: &Path,
        proxy: Option<&ProxyHandle>,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--no-playlist".into(),
            "-f".into(),
            self.format.clone().into(),
            "-o".into(),
            output_template.as_os_str().to_owned(),
            "--write-thumbnail".into(),
            "--no-progress".into(),
            "--no-simulate".into(),
            "--print".into(),
            "after_move:filepath".into(),
            "--no-warnings".into(),
        ];
        push_proxy(&mut args, proxy);
        args.push("--".into());
        args.push(self.source_url(record).into());
        args
    }

    fn source_url(&self, record: &MediaRecord) -> String {
        if record.source_url.is_empty() {
            format!("{}{}", self.watch_url_base, record.id)
        } else {
            record.source_url.clone()
        }
    }

    /// Interpret search output
    ///
    /// A failed exit with some parsable entries still yields those entries.
    pub fn interpret_search(
        &self,
        output: &CommandOutput,
    ) -> Result<Vec<MediaRecord>, BackendError> {
        let listing = parse_listing(&output.stdout, &self.watch_url_base);
        if listing.skipped > 0 {
            debug!(skipped = listing.skipped, "Skipped malformed search entries");
        }

        if !output.success {
            if listing.records.is_empty() {
                return Err(failure_from(output));
            }
            warn!(
                status = %output.status,
                returned = listing.records.len(),
                "Search exited with an error, keeping partial results"
            );
        } else if listing.records.is_empty() && listing.skipped > 0 {
            return Err(BackendError::new(
                FailureKind::Malformed,
                format!("{} search entries could not be parsed", listing.skipped),
            ));
        }

        Ok(listing.records)
    }

    /// Resolve the asset path a fetch produced
    ///
    /// Prefers the path printed by the backend; falls back to scanning the
    /// item directory.
    pub fn interpret_fetch(
        &self,
        record: &MediaRecord,
        layout: &AssetLayout,
        output: &CommandOutput,
    ) -> Result<FetchedAsset, BackendError> {
        if !output.success {
            return Err(failure_from(output));
        }

        let printed = output
            .stdout
            .lines()
            .map(str::trim)
            .rev()
            .find(|line| !line.is_empty())
            .map(PathBuf::from)
            .filter(|path| path.is_file());

        let media_path = printed
            .or_else(|| layout.find_media(&record.id))
            .ok_or_else(|| {
                BackendError::new(
                    FailureKind::MissingAsset,
                    format!("no asset found under {}", layout.item_dir(&record.id).display()),
                )
            })?;

        Ok(FetchedAsset {
            media_path,
            thumbnail_path: layout.find_thumbnail(&record.id),
        })
    }

    async fn run(&self, args: Vec<OsString>, timeout: Duration) -> Result<CommandOutput, BackendError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| {
                BackendError::new(
                    FailureKind::Timeout,
                    format!("{} timed out after {}s", self.program.display(), timeout.as_secs()),
                )
            })?
            .map_err(|e| {
                let kind = if e.kind() == std::io::ErrorKind::NotFound {
                    FailureKind::Spawn
                } else {
                    FailureKind::Generic
                };
                BackendError::new(kind, format!("Failed to execute {}: {e}", self.program.display()))
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl CatalogBackend for YtDlpBackend {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        proxy: Option<&ProxyHandle>,
    ) -> Result<Vec<MediaRecord>, BackendError> {
        let output = self
            .run(self.search_args(query, max_results, proxy), self.search_timeout)
            .await?;
        self.interpret_search(&output)
    }

    async fn fetch(
        &self,
        record: &MediaRecord,
        layout: &AssetLayout,
        proxy: Option<&ProxyHandle>,
    ) -> Result<FetchedAsset, BackendError> {
        let template = layout.output_template(&record.id);
        let output = self
            .run(self.fetch_args(record, &template, proxy), self.fetch_timeout)
            .await?;
        self.interpret_fetch(record, layout, &output)
    }

    fn name(&self) -> &str {
        "yt-dlp"
    }
}

fn push_proxy(args: &mut Vec<OsString>, proxy: Option<&ProxyHandle>) {
    if let Some(proxy) = proxy {
        args.push("--proxy".into());
        args.push(proxy.as_str().into());
    }
}

fn failure_from(output: &CommandOutput) -> BackendError {
    let kind = classify_diagnostics(&output.stderr);
    let detail = tail_lines(&output.stderr, DIAGNOSTIC_LINES);
    let message = if detail.is_empty() {
        format!("exited with {}", output.status)
    } else {
        format!("exited with {}: {detail}", output.status)
    };
    BackendError::new(kind, message)
}
