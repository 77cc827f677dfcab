//! Sliding-window rate limiting with exponential backoff
//!
//! One [`RateLimiter`] instance is shared by every outbound catalog call
//! (searches and downloads alike) so they all contend for the same quota.
//! Admission is checked against two trailing windows, per minute and per
//! hour, which bounds the admitted count in *any* trailing interval rather
//! than per fixed bucket.

use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::downloader::config::{
    BACKOFF_CEILING_MS, BACKOFF_FLOOR_MS, DEFAULT_PER_HOUR, DEFAULT_PER_MINUTE,
};
use crate::shutdown::{sleep_unless_shutdown, SharedShutdown};

/// Length of the short window
pub const MINUTE: Duration = Duration::from_secs(60);

/// Length of the long window
pub const HOUR: Duration = Duration::from_secs(3600);

/// Rate limiter quotas and backoff bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Calls admitted per trailing 60 seconds
    pub per_minute: usize,
    /// Calls admitted per trailing hour
    pub per_hour: usize,
    /// Backoff level after a success
    pub backoff_floor: Duration,
    /// Backoff never grows past this
    pub backoff_ceiling: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: DEFAULT_PER_MINUTE,
            per_hour: DEFAULT_PER_HOUR,
            backoff_floor: Duration::from_millis(BACKOFF_FLOOR_MS),
            backoff_ceiling: Duration::from_millis(BACKOFF_CEILING_MS),
        }
    }
}

impl RateLimitConfig {
    /// Quotas with default backoff bounds
    pub fn with_limits(per_minute: usize, per_hour: usize) -> Self {
        Self {
            per_minute,
            per_hour,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), RateLimitError> {
        if self.per_minute == 0 || self.per_hour == 0 {
            return Err(RateLimitError::InvalidConfig(
                "per-minute and per-hour limits must be at least 1".to_string(),
            ));
        }
        if self.backoff_floor.is_zero() {
            return Err(RateLimitError::InvalidConfig(
                "backoff floor must be positive".to_string(),
            ));
        }
        if self.backoff_ceiling < self.backoff_floor {
            return Err(RateLimitError::InvalidConfig(format!(
                "backoff ceiling ({:?}) is below the floor ({:?})",
                self.backoff_ceiling, self.backoff_floor
            )));
        }
        Ok(())
    }
}

/// Admitted-call timestamps within a trailing horizon
///
/// Timestamps are appended in monotonic order, so expired entries always
/// form a prefix and purging is a front drop.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    capacity: usize,
    horizon: Duration,
    stamps: VecDeque<Instant>,
}

impl SlidingWindow {
    /// Create an empty window
    pub fn new(capacity: usize, horizon: Duration) -> Self {
        Self {
            capacity,
            horizon,
            stamps: VecDeque::with_capacity(capacity.min(4096)),
        }
    }

    /// Drop entries that have aged out of the horizon as of `now`
    pub fn purge(&mut self, now: Instant) {
        while let Some(&oldest) = self.stamps.front() {
            if now.saturating_duration_since(oldest) >= self.horizon {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until one more call fits, assuming the window was purged at `now`
    pub fn wait_time(&self, now: Instant) -> Duration {
        if self.stamps.len() < self.capacity {
            return Duration::ZERO;
        }
        // The entry whose expiry brings the count back below capacity.
        let pivot = self.stamps[self.stamps.len() - self.capacity];
        (pivot + self.horizon).saturating_duration_since(now)
    }

    /// Record an admitted call
    pub fn record(&mut self, now: Instant) {
        self.stamps.push_back(now);
    }

    /// Number of entries currently held
    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    /// Whether the window holds no entries
    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries still inside the horizon at `now`, without purging
    fn live_count(&self, now: Instant) -> usize {
        self.stamps
            .iter()
            .filter(|&&t| now.saturating_duration_since(t) < self.horizon)
            .count()
    }
}

#[derive(Debug)]
struct Windows {
    minute: SlidingWindow,
    hour: SlidingWindow,
}

impl Windows {
    fn wait_time(&mut self, now: Instant) -> Duration {
        self.minute.purge(now);
        self.hour.purge(now);
        self.minute.wait_time(now).max(self.hour.wait_time(now))
    }
}

#[derive(Debug)]
struct BackoffState {
    current: Duration,
    penalty_until: Option<Instant>,
}

/// Point-in-time limiter statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterStats {
    /// Calls admitted in the trailing minute
    pub calls_last_minute: usize,
    /// Calls admitted in the trailing hour
    pub calls_last_hour: usize,
    /// Per-minute limit
    pub minute_limit: usize,
    /// Per-hour limit
    pub hour_limit: usize,
    /// Current backoff level
    pub backoff: Duration,
}

/// Shared two-window rate limiter
///
/// Call [`admit`](Self::admit) immediately before every outbound operation
/// and [`report_outcome`](Self::report_outcome) immediately after it.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    // Held across the admission wait so concurrent callers queue instead of
    // both seeing spare capacity.
    windows: Mutex<Windows>,
    backoff: StdMutex<BackoffState>,
    shutdown: Option<SharedShutdown>,
}

impl RateLimiter {
    /// Create a limiter
    ///
    /// # Errors
    /// Returns [`RateLimitError::InvalidConfig`] for zero limits or inverted
    /// backoff bounds.
    pub fn new(config: RateLimitConfig) -> Result<Self, RateLimitError> {
        config.validate()?;
        Ok(Self {
            windows: Mutex::new(Windows {
                minute: SlidingWindow::new(config.per_minute, MINUTE),
                hour: SlidingWindow::new(config.per_hour, HOUR),
            }),
            backoff: StdMutex::new(BackoffState {
                current: config.backoff_floor,
                penalty_until: None,
            }),
            config,
            shutdown: None,
        })
    }

    /// Attach a shared shutdown handle so waits can be cancelled.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Configured quotas
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Wait until both windows have room and any failure penalty has passed,
    /// then record one call.
    ///
    /// The call is counted as soon as it is admitted, before its result is
    /// known. Returns how long the caller was held.
    ///
    /// # Errors
    /// Returns [`RateLimitError::Cancelled`] if shutdown is requested before
    /// admission; nothing is recorded in that case.
    pub async fn admit(&self) -> Result<Duration, RateLimitError> {
        let started = Instant::now();
        let mut windows = self.windows.lock().await;

        loop {
            if self.shutdown_requested() {
                return Err(RateLimitError::Cancelled);
            }

            let now = Instant::now();
            let quota_wait = windows.wait_time(now);
            let penalty_wait = self.penalty_remaining(now);
            let wait = quota_wait.max(penalty_wait);
            if wait.is_zero() {
                break;
            }

            info!(
                wait_ms = wait.as_millis() as u64,
                minute_calls = windows.minute.len(),
                hour_calls = windows.hour.len(),
                backoff = penalty_wait > quota_wait,
                "Rate limit: waiting before next call"
            );
            if !sleep_unless_shutdown(self.shutdown.as_ref(), wait).await {
                return Err(RateLimitError::Cancelled);
            }
        }

        let now = Instant::now();
        windows.minute.record(now);
        windows.hour.record(now);

        let waited = now.saturating_duration_since(started);
        crate::metrics::record_admission(waited, windows.minute.len(), windows.hour.len());
        debug!(
            waited_ms = waited.as_millis() as u64,
            minute_calls = windows.minute.len(),
            hour_calls = windows.hour.len(),
            "Call admitted"
        );
        Ok(waited)
    }

    /// Report how the admitted call went.
    ///
    /// Success resets backoff to its floor. Failure doubles it (up to the
    /// ceiling), makes every caller's next admission wait at least that long,
    /// and holds the reporter for the same duration. Returns the time slept.
    pub async fn report_outcome(&self, success: bool) -> Duration {
        let backoff = {
            let mut state = self.lock_backoff();
            if success {
                state.current = self.config.backoff_floor;
                state.penalty_until = None;
                crate::metrics::record_backoff(state.current);
                return Duration::ZERO;
            }
            state.current = state
                .current
                .saturating_mul(2)
                .min(self.config.backoff_ceiling);
            state.penalty_until = Some(Instant::now() + state.current);
            state.current
        };

        crate::metrics::record_backoff(backoff);
        warn!(
            backoff_ms = backoff.as_millis() as u64,
            "Call failed, backing off"
        );
        sleep_unless_shutdown(self.shutdown.as_ref(), backoff).await;
        backoff
    }

    /// Current backoff level
    pub fn backoff(&self) -> Duration {
        self.lock_backoff().current
    }

    /// Current window occupancy and backoff
    ///
    /// Waits for any in-progress admission to finish.
    pub async fn stats(&self) -> RateLimiterStats {
        let windows = self.windows.lock().await;
        let now = Instant::now();
        RateLimiterStats {
            calls_last_minute: windows.minute.live_count(now),
            calls_last_hour: windows.hour.live_count(now),
            minute_limit: windows.minute.capacity(),
            hour_limit: windows.hour.capacity(),
            backoff: self.backoff(),
        }
    }

    fn penalty_remaining(&self, now: Instant) -> Duration {
        self.lock_backoff()
            .penalty_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    fn lock_backoff(&self) -> std::sync::MutexGuard<'_, BackoffState> {
        // Backoff state is two plain values; a panic elsewhere cannot leave it torn.
        self.backoff.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }
}

/// Rate limiter errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Rejected configuration
    #[error("invalid rate limit configuration: {0}")]
    InvalidConfig(String),

    /// Shutdown requested while waiting for admission
    #[error("admission cancelled by shutdown")]
    Cancelled,
}
