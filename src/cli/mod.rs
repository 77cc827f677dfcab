//! CLI definition and command implementations

use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::CatalogConfig;
use crate::downloader::config::{
    DEFAULT_DOWNLOAD_CONCURRENCY, DEFAULT_MAX_RESULTS, DEFAULT_PER_HOUR, DEFAULT_PER_MINUTE,
    DEFAULT_QUERY, MAX_DOWNLOAD_CONCURRENCY, RECOVERY_INTERVAL_SECS, STEADY_INTERVAL_SECS,
};
use crate::downloader::{IngestConfig, RateLimitConfig};
use crate::proxy::list::DEFAULT_PROXY_LIST_URL;
use crate::proxy::{DirectConnection, ProxyListService, ProxySource};
use crate::store::STORE_FILE_NAME;

pub mod commands;
pub mod error;

pub use error::CliError;

/// Parse and validate download concurrency
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_DOWNLOAD_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_DOWNLOAD_CONCURRENCY}"
        ));
    }
    Ok(value)
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

/// Media ingest CLI
#[derive(Parser, Debug)]
#[command(name = "media-ingest")]
#[command(about = "Continuously discover and download media through rate-limited proxies", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Data directory holding the store and downloaded assets
    #[arg(long, global = true, env = "MEDIA_INGEST_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Query searched by the ingestion loop
    #[arg(long, global = true, env = "MEDIA_INGEST_QUERY", default_value = DEFAULT_QUERY)]
    pub query: String,

    /// Results requested per search
    #[arg(long, global = true, env = "MEDIA_INGEST_MAX_RESULTS", default_value_t = DEFAULT_MAX_RESULTS)]
    pub max_results: usize,

    /// Calls admitted per trailing minute
    #[arg(long, global = true, env = "MEDIA_INGEST_PER_MINUTE", default_value_t = DEFAULT_PER_MINUTE)]
    pub per_minute: usize,

    /// Calls admitted per trailing hour
    #[arg(long, global = true, env = "MEDIA_INGEST_PER_HOUR", default_value_t = DEFAULT_PER_HOUR)]
    pub per_hour: usize,

    /// Sleep after a clean cycle, in seconds
    #[arg(long, global = true, env = "MEDIA_INGEST_STEADY_INTERVAL_SECS", default_value_t = STEADY_INTERVAL_SECS)]
    pub steady_interval_secs: u64,

    /// Sleep after a failed cycle, in seconds (must be below the steady interval)
    #[arg(long, global = true, env = "MEDIA_INGEST_RECOVERY_INTERVAL_SECS", default_value_t = RECOVERY_INTERVAL_SECS)]
    pub recovery_interval_secs: u64,

    /// Downloads in flight per cycle (max 8)
    ///
    /// Every download still passes through the shared rate limiter.
    #[arg(
        long,
        global = true,
        env = "MEDIA_INGEST_DOWNLOAD_CONCURRENCY",
        default_value_t = DEFAULT_DOWNLOAD_CONCURRENCY,
        value_parser = parse_concurrency
    )]
    pub download_concurrency: usize,

    /// Free-proxy listing endpoint
    #[arg(long, global = true, env = "MEDIA_INGEST_PROXY_LIST_URL", default_value = DEFAULT_PROXY_LIST_URL)]
    pub proxy_list_url: String,

    /// Connect directly instead of through disposable proxies
    #[arg(long, global = true, env = "MEDIA_INGEST_NO_PROXY", default_value_t = false)]
    pub no_proxy: bool,

    /// yt-dlp executable
    #[arg(long = "yt-dlp", global = true, env = "MEDIA_INGEST_YT_DLP", default_value = "yt-dlp")]
    pub yt_dlp: PathBuf,

    /// Format selector handed to yt-dlp
    #[arg(long, global = true, env = "MEDIA_INGEST_FORMAT", default_value = crate::catalog::DEFAULT_FORMAT)]
    pub format: String,

    /// Serve Prometheus metrics on this address
    #[arg(long, global = true, env = "MEDIA_INGEST_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    /// Output format (json or human)
    #[arg(long, global = true, env = "MEDIA_INGEST_OUTPUT_FORMAT", value_enum, default_value = "human")]
    pub output_format: OutputFormat,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the ingestion loop until interrupted
    Run,

    /// Search once and print the results
    Search {
        /// Free-text query
        query: String,

        /// Results to return (defaults to --max-results)
        #[arg(long = "limit")]
        limit: Option<usize>,
    },

    /// Download a stored item now
    Fetch {
        /// Media id
        id: String,
    },

    /// List stored media
    List,

    /// Remove a stored item and its files
    Remove {
        /// Media id
        id: String,
    },

    /// Show the search history
    History,
}

impl Cli {
    /// Path of the store document
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE_NAME)
    }

    /// Ingestion loop configuration
    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig::default()
            .with_query(self.query.clone())
            .with_max_results(self.max_results)
            .with_intervals(
                Duration::from_secs(self.steady_interval_secs),
                Duration::from_secs(self.recovery_interval_secs),
            )
            .with_download_concurrency(self.download_concurrency)
    }

    /// Rate limiter quotas
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig::with_limits(self.per_minute, self.per_hour)
    }

    /// Catalog settings
    pub fn catalog_config(&self) -> CatalogConfig {
        CatalogConfig::new(&self.data_dir)
            .with_program(&self.yt_dlp)
            .with_format(&self.format)
    }

    /// Proxy source selected by `--no-proxy` / `--proxy-list-url`
    pub fn proxy_source(&self) -> Arc<dyn ProxySource> {
        if self.no_proxy {
            Arc::new(DirectConnection)
        } else {
            Arc::new(ProxyListService::new(self.proxy_list_url.clone()))
        }
    }
}
