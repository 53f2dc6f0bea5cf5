//! Retry loop and latency classification shared by every probe variant.
//!
//! A variant supplies a single-attempt probe; [`MonitoringExecutor`] turns it
//! into a full check cycle that always ends in exactly one [`CheckResult`].

use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::types::{CheckResult, ProbeClock, ProbeTiming};

/// Latency at or above which a successful probe is reported as degraded
pub const DEFAULT_DEGRADED_THRESHOLD: Duration = Duration::from_millis(2000);

/// Per-attempt timeout used when none is configured
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

pub const CANCELLED_MESSAGE: &str = "monitor cancelled";

/// Why a single probe attempt failed
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to create request: {0}")]
    Request(String),

    #[error("client unavailable: {0}")]
    ClientUnavailable(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unaccepted status code: {0}")]
    UnacceptedStatus(u16),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(#[from] std::io::Error),
}

/// Outcome of a successful attempt
#[derive(Debug)]
pub struct ProbeSuccess {
    pub timing: ProbeTiming,
    pub details: Option<serde_json::Value>,
}

/// A failed attempt, with whatever the probe observed before giving up
#[derive(Debug)]
pub struct ProbeFailure {
    pub error: ProbeError,
    pub details: Option<serde_json::Value>,
}

impl ProbeFailure {
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<ProbeError> for ProbeFailure {
    fn from(error: ProbeError) -> Self {
        Self { error, details: None }
    }
}

impl From<std::io::Error> for ProbeFailure {
    fn from(error: std::io::Error) -> Self {
        ProbeError::from(error).into()
    }
}

/// Fixed-delay retry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub retry_interval: Duration,
}

impl RetryPolicy {
    /// Negative retry counts mean a single attempt
    pub fn new(retries: i32, retry_interval: Duration) -> Self {
        Self { retries: retries.max(0).unsigned_abs(), retry_interval }
    }

    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }
}

/// Zero falls back to [`DEFAULT_ATTEMPT_TIMEOUT`]
pub fn effective_timeout(timeout: Duration) -> Duration {
    if timeout.is_zero() { DEFAULT_ATTEMPT_TIMEOUT } else { timeout }
}

/// Zero falls back to [`DEFAULT_DEGRADED_THRESHOLD`]
pub fn effective_degraded_threshold(threshold: Duration) -> Duration {
    if threshold.is_zero() { DEFAULT_DEGRADED_THRESHOLD } else { threshold }
}

/// Runs one check cycle for a monitor
pub struct MonitoringExecutor<'a> {
    monitor_id: &'a str,
    kind: &'static str,
    policy: RetryPolicy,
    degraded_threshold: Duration,
}

impl<'a> MonitoringExecutor<'a> {
    pub fn new(
        monitor_id: &'a str,
        kind: &'static str,
        policy: RetryPolicy,
        degraded_threshold: Duration,
    ) -> Self {
        Self {
            monitor_id,
            kind,
            policy,
            degraded_threshold: effective_degraded_threshold(degraded_threshold),
        }
    }

    /// Execute up to `retries + 1` attempts of `probe`.
    ///
    /// `token` is only consulted at attempt boundaries. The retry sleep does
    /// not observe it, so cancellation latency is bounded by the retry
    /// interval plus one attempt timeout.
    pub async fn execute<F, Fut>(&self, token: &CancellationToken, mut probe: F) -> CheckResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ProbeSuccess, ProbeFailure>>,
    {
        let retries = self.policy.retries;
        let mut first_start = None;

        for attempt in 0..=retries {
            if token.is_cancelled() {
                debug!(monitor_id = self.monitor_id, attempt, "check cancelled before attempt");
                return self.result().failure(ProbeTiming::instant(Utc::now()), CANCELLED_MESSAGE);
            }

            let first = *first_start.get_or_insert_with(ProbeClock::start);

            match probe().await {
                Ok(success) => return self.classify(success),
                Err(failure) if attempt < retries => {
                    debug!(
                        monitor_id = self.monitor_id,
                        attempt,
                        error = %failure.error,
                        "probe attempt failed, retrying in {:?}",
                        self.policy.retry_interval
                    );
                    tokio::time::sleep(self.policy.retry_interval).await;
                }
                Err(failure) => {
                    let result = self.result().failure(
                        first.stop(),
                        format!("check failed after {} retries: {}", retries, failure.error),
                    );
                    return match failure.details {
                        Some(details) => result.with_details(details),
                        None => result,
                    };
                }
            }
        }

        // Every iteration returns or retries, reaching this is a bug
        self.result().failure(ProbeTiming::instant(Utc::now()), "unexpected error")
    }

    fn result(&self) -> CheckResult {
        CheckResult::new(self.monitor_id, self.kind)
    }

    fn classify(&self, success: ProbeSuccess) -> CheckResult {
        let result = if success.timing.duration >= self.degraded_threshold {
            self.result().degraded(success.timing, self.degraded_threshold)
        } else {
            self.result().success(success.timing)
        };

        match success.details {
            Some(details) => result.with_details(details),
            None => result,
        }
    }
}
