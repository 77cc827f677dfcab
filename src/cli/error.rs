//! CLI error types and conversions

use crate::catalog::CatalogError;
use crate::downloader::{IngestError, RateLimitError};
use crate::identifier::IdentifierError;
use crate::service::ServiceError;
use crate::store::StoreError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Identifier error
    #[error("identifier error: {0}")]
    Identifier(#[from] IdentifierError),

    /// Rate limiter error
    #[error("rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),

    /// Catalog error
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Ingestion loop error
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// Service error
    #[error("{0}")]
    Service(#[from] ServiceError),

    /// Output could not be rendered
    #[error("output error: {0}")]
    Output(String),

    /// Metrics exporter could not be installed
    #[error("metrics error: {0}")]
    Metrics(String),
}
