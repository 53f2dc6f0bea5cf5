//! The contract every probe variant implements, plus the runtime state
//! block variants embed to satisfy it.

use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::types::CheckResult;

/// Something checkable on an interval.
///
/// The scheduler only talks to monitors through this trait, so new protocols
/// plug in without the scheduler knowing their internals.
#[async_trait::async_trait]
pub trait Monitor: Send + Sync {
    /// Unique identity within a scheduler
    fn id(&self) -> &str;

    /// Probe type tag copied into every result
    fn kind(&self) -> &'static str;

    /// Derive this monitor's cancellation scope from `parent` and run one-time
    /// setup. No-op when already started.
    fn start(&self, parent: &CancellationToken);

    /// Cancel the scope so the loop exits and a later `start` works again.
    ///
    /// Does not wait for an in-flight check.
    fn stop(&self);

    /// Scope handed out by the last `start`, cancelled once stopped and
    /// `None` before the first start
    fn cancellation_token(&self) -> Option<CancellationToken>;

    /// Busy flag: whether a check is currently executing
    fn is_running(&self) -> bool;

    fn set_running(&self, running: bool);

    /// Raise the busy flag unless it is already raised, as one step.
    /// Returns `false` when a check is in flight.
    fn try_acquire(&self) -> bool;

    /// Run one full check cycle, retries included.
    ///
    /// Never fails: every failure mode is encoded in the returned result.
    /// `scope` is used when the monitor was never started.
    async fn check(&self, scope: &CancellationToken) -> CheckResult;

    fn heartbeat_interval(&self) -> Duration;

    fn last_heartbeat(&self) -> Option<DateTime<Utc>>;

    fn set_last_heartbeat(&self, at: DateTime<Utc>);
}

#[derive(Debug, Default)]
struct StateInner {
    /// Scope of the last start; left in place, cancelled, after a stop
    token: Option<CancellationToken>,
    started: bool,
    running: bool,
    last_heartbeat: Option<DateTime<Utc>>,
}

/// Mutable runtime fields of one monitor behind a lock private to it.
///
/// Critical sections never await, so a blocking mutex is enough and the lock
/// is never held across a probe.
#[derive(Debug, Default)]
pub struct MonitorState {
    inner: Mutex<StateInner>,
}

impl MonitorState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StateInner> {
        // The fields stay consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Derive a fresh child of `parent`; returns `false` if already started.
    pub fn start(&self, parent: &CancellationToken) -> bool {
        let mut inner = self.lock();
        if inner.started {
            return false;
        }
        inner.token = Some(parent.child_token());
        inner.started = true;
        true
    }

    /// Cancel the scope and allow a later start; returns `false` if not started.
    ///
    /// The cancelled scope stays readable so a check that races the stop
    /// still observes the cancellation.
    pub fn stop(&self) -> bool {
        let mut inner = self.lock();
        if !inner.started {
            return false;
        }
        inner.started = false;
        if let Some(token) = &inner.token {
            token.cancel();
        }
        true
    }

    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    /// Scope of the last start, `None` before the first one
    pub fn token(&self) -> Option<CancellationToken> {
        self.lock().token.clone()
    }

    /// The last scope, or `fallback` when never started
    pub fn token_or(&self, fallback: &CancellationToken) -> CancellationToken {
        self.token().unwrap_or_else(|| fallback.clone())
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn set_running(&self, running: bool) {
        self.lock().running = running;
    }

    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        if inner.running {
            return false;
        }
        inner.running = true;
        true
    }

    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.lock().last_heartbeat
    }

    pub fn set_last_heartbeat(&self, at: DateTime<Utc>) {
        self.lock().last_heartbeat = Some(at);
    }
}
