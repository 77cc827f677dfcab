//! Command execution

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::{Cli, CliError, Commands, OutputFormat};
use crate::catalog::{CatalogClient, YtDlpBackend};
use crate::downloader::{IngestLoop, RateLimiter};
use crate::identifier::MediaId;
use crate::service::{DownloadOutcome, MediaService};
use crate::shutdown::SharedShutdown;
use crate::store::{DedupStore, JsonMediaStore};
use crate::{MediaRecord, SearchHistoryEntry};

/// Wired-up pipeline components
struct Pipeline {
    catalog: Arc<CatalogClient>,
    store: Arc<dyn DedupStore>,
}

impl Pipeline {
    fn build(cli: &Cli, shutdown: &SharedShutdown) -> Result<Self, CliError> {
        let limiter =
            Arc::new(RateLimiter::new(cli.rate_limit_config())?.with_shutdown(shutdown.clone()));
        let config = cli.catalog_config();
        let backend = Arc::new(YtDlpBackend::new(&config));
        let catalog = Arc::new(CatalogClient::new(
            backend,
            cli.proxy_source(),
            limiter,
            config,
        ));
        let store: Arc<dyn DedupStore> = Arc::new(JsonMediaStore::open(cli.store_path())?);
        Ok(Self { catalog, store })
    }

    fn service(&self) -> MediaService {
        MediaService::new(self.catalog.clone(), self.store.clone())
    }
}

/// Execute the parsed command
pub async fn execute(cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
    if let Some(addr) = cli.metrics_addr {
        crate::metrics::init_metrics(addr)
            .await
            .map_err(|e| CliError::Metrics(e.to_string()))?;
    }

    let pipeline = Pipeline::build(cli, &shutdown)?;
    let service = pipeline.service();
    let format = cli.output_format;

    match &cli.command {
        Commands::Run => {
            let stale = service.reconcile()?;
            if stale > 0 {
                info!(stale, "Stale records will be downloaded again");
            }
            let ingest = IngestLoop::new(
                pipeline.catalog.clone(),
                pipeline.store.clone(),
                cli.ingest_config(),
                shutdown,
            )?;
            ingest.run().await;
            Ok(())
        }
        Commands::Search { query, limit } => {
            let records = service
                .search(query, limit.unwrap_or(cli.max_results))
                .await?;
            print_records(format, &records)
        }
        Commands::Fetch { id } => {
            let id = MediaId::parse(id)?;
            let outcome = service.download(&id).await?;
            print_download(format, &outcome)
        }
        Commands::List => print_records(format, &service.list()?),
        Commands::Remove { id } => {
            let id = MediaId::parse(id)?;
            let removed = service.remove(&id)?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "removed": removed.id,
                })),
                OutputFormat::Human => {
                    println!("Removed {} ({})", removed.id, removed.title);
                    Ok(())
                }
            }
        }
        Commands::History => print_history(format, &service.history()?),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| CliError::Output(e.to_string()))?;
    println!("{json}");
    Ok(())
}

fn print_records(format: OutputFormat, records: &[MediaRecord]) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => print_json(records),
        OutputFormat::Human => {
            if records.is_empty() {
                println!("No media.");
            }
            for record in records {
                let status = match &record.local_path {
                    Some(path) => path.display().to_string(),
                    None => "not downloaded".to_string(),
                };
                println!("{:<16} {:<48} {}", record.id.as_str(), record.title, status);
            }
            Ok(())
        }
    }
}

fn print_download(format: OutputFormat, outcome: &DownloadOutcome) -> Result<(), CliError> {
    let already = matches!(outcome, DownloadOutcome::AlreadyDownloaded(_));
    let record = outcome.record();
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "already_downloaded": already,
            "media": record,
        })),
        OutputFormat::Human => {
            let verb = if already { "Already downloaded" } else { "Downloaded" };
            let path = record
                .local_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            println!("{verb}: {} -> {path}", record.id);
            Ok(())
        }
    }
}

fn print_history(format: OutputFormat, history: &[SearchHistoryEntry]) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => print_json(history),
        OutputFormat::Human => {
            if history.is_empty() {
                println!("No searches yet.");
            }
            for entry in history {
                println!(
                    "{}  {:>3} result(s)  {}",
                    entry.timestamp.to_rfc3339(),
                    entry.result_count,
                    entry.query
                );
            }
            Ok(())
        }
    }
}
