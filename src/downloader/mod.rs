//! Admission control and the ingestion loop
//!
//! # Overview
//!
//! 1. **Rate Limiting**: every outbound catalog call passes through one shared
//!    [`rate_limit::RateLimiter`] (two trailing windows plus failure backoff)
//! 2. **Ingestion**: [`ingest::IngestLoop`] searches, diffs against the dedup
//!    store, downloads what is new and sleeps on a steady or recovery cadence
//! 3. **Configuration**: defaults and validation live in [`config`]
//!
//! # Components
//!
//! - [`rate_limit`] - Sliding-window limiter with exponential backoff
//! - [`ingest`] - Search/diff/download state machine
//! - [`config`] - Cadences, quotas and concurrency defaults
//!
//! # Related Modules
//!
//! - [`crate::catalog`] - Search and fetch, gated by the limiter
//! - [`crate::store`] - Durable dedup store

pub mod config;
pub mod ingest;
pub mod rate_limit;

pub use config::IngestConfig;
pub use ingest::{Cadence, CycleOutcome, CycleReport, IngestError, IngestLoop, IngestState};
pub use rate_limit::{RateLimitConfig, RateLimitError, RateLimiter, RateLimiterStats};
