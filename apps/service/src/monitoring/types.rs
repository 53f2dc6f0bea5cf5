use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Status of a monitoring check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Up,
    Down,
    Degraded,
    Warning,
    Unknown,
}

impl MonitorStatus {
    /// Whether a result with this status counts as a successful check
    pub fn is_healthy(self) -> bool {
        matches!(self, MonitorStatus::Up | MonitorStatus::Degraded)
    }

    /// Short glyph used by console consumers
    pub fn icon(self) -> &'static str {
        match self {
            MonitorStatus::Up => "✅",
            MonitorStatus::Down => "❌",
            MonitorStatus::Degraded => "🟠",
            MonitorStatus::Warning => "⚠️",
            MonitorStatus::Unknown => "❓",
        }
    }
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorStatus::Up => write!(f, "up"),
            MonitorStatus::Down => write!(f, "down"),
            MonitorStatus::Degraded => write!(f, "degraded"),
            MonitorStatus::Warning => write!(f, "warning"),
            MonitorStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Address family a probe may use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IpFamily {
    V4,
    V6,
    /// Dual stack
    #[default]
    Any,
}

impl IpFamily {
    pub fn allows(self, addr: &std::net::SocketAddr) -> bool {
        match self {
            IpFamily::V4 => addr.is_ipv4(),
            IpFamily::V6 => addr.is_ipv6(),
            IpFamily::Any => true,
        }
    }
}

/// Unknown spellings fall back to dual stack
impl From<&str> for IpFamily {
    fn from(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "v4" | "ipv4" => IpFamily::V4,
            "v6" | "ipv6" => IpFamily::V6,
            _ => IpFamily::Any,
        }
    }
}

impl From<String> for IpFamily {
    fn from(value: String) -> Self {
        IpFamily::from(value.as_str())
    }
}

impl From<IpFamily> for String {
    fn from(value: IpFamily) -> Self {
        match value {
            IpFamily::V4 => "v4".into(),
            IpFamily::V6 => "v6".into(),
            IpFamily::Any => "auto".into(),
        }
    }
}

/// Span of a probe or a sequence of attempts.
///
/// `start` and `end` are wall-clock stamps, `duration` comes from the
/// monotonic clock and `end` is derived from it, so a clock step during a
/// probe never skews the latency.
#[derive(Debug, Clone)]
pub struct ProbeTiming {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration: Duration,
}

impl ProbeTiming {
    /// Timing for a span that begins and ends at `at`
    pub fn instant(at: DateTime<Utc>) -> Self {
        Self { start: at, end: at, duration: Duration::ZERO }
    }

    /// Timing of `duration` starting at `start`
    pub fn from_elapsed(start: DateTime<Utc>, duration: Duration) -> Self {
        let end = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|elapsed| start.checked_add_signed(elapsed))
            .unwrap_or(start);
        Self { start, end, duration }
    }
}

/// Running measurement started by [`ProbeClock::start`]
#[derive(Debug, Clone, Copy)]
pub struct ProbeClock {
    at: DateTime<Utc>,
    started: Instant,
}

impl ProbeClock {
    pub fn start() -> Self {
        Self { at: Utc::now(), started: Instant::now() }
    }

    /// Wall-clock stamp taken at start
    pub fn started_at(&self) -> DateTime<Utc> {
        self.at
    }

    pub fn stop(&self) -> ProbeTiming {
        ProbeTiming::from_elapsed(self.at, self.started.elapsed())
    }
}

/// Result of one complete check cycle (all retries included)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// ID of the monitor that was checked
    pub monitor_id: String,

    /// Probe type tag, e.g. `http/https` or `tcp`
    #[serde(rename = "type")]
    pub kind: String,

    pub status: MonitorStatus,

    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,

    /// Always `end_time - start_time`
    pub duration: Duration,

    /// Human readable note, e.g. why a result is degraded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Error text of a failed check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub success: bool,

    pub checked_at: DateTime<Utc>,

    /// Protocol specific payload (status code, address, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CheckResult {
    /// Create a new check result with unknown status, stamped at the current time
    pub fn new(monitor_id: impl Into<String>, kind: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            monitor_id: monitor_id.into(),
            kind: kind.into(),
            status: MonitorStatus::Unknown,
            start_time: now,
            end_time: now,
            duration: Duration::ZERO,
            message: None,
            error: None,
            success: false,
            checked_at: now,
            details: None,
        }
    }

    /// Mark the check as successful
    pub fn success(mut self, timing: ProbeTiming) -> Self {
        self.apply_timing(timing);
        self.status = MonitorStatus::Up;
        self.success = true;
        self
    }

    /// Mark the check as successful but slow
    pub fn degraded(mut self, timing: ProbeTiming, threshold: Duration) -> Self {
        self.message =
            Some(format!("Response slow: {:?} >= {:?} threshold", timing.duration, threshold));
        self.apply_timing(timing);
        self.status = MonitorStatus::Degraded;
        self.success = true;
        self
    }

    /// Mark the check as failed with error
    pub fn failure(mut self, timing: ProbeTiming, error: impl Into<String>) -> Self {
        self.apply_timing(timing);
        self.status = MonitorStatus::Down;
        self.success = false;
        self.error = Some(error.into());
        self
    }

    /// Attach a protocol specific payload
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn apply_timing(&mut self, timing: ProbeTiming) {
        self.start_time = timing.start;
        self.end_time = timing.end;
        self.duration = timing.duration;
        self.checked_at = timing.start;
    }
}
