use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::monitor::Monitor;
use super::types::CheckResult;

/// Capacity of the shared result channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Shortest period a monitor loop ticks at; zero intervals are clamped to it
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Longest period a monitor loop ticks at; larger intervals are clamped to it
const MAX_TICK_INTERVAL: Duration = Duration::from_secs(365 * 86400);

/// Lifecycle of a scheduler; `Stopped` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler can only run once (current state: {0:?})")]
    AlreadyStarted(SchedulerState),
}

/// Everything guarded by the registry lock
struct Registry {
    state: SchedulerState,
    monitors: HashMap<String, Arc<dyn Monitor>>,
    /// Dropped once every monitor loop has exited, closing the channel
    result_tx: Option<mpsc::Sender<CheckResult>>,
}

/// Monitoring scheduler - runs one independent check loop per monitor and
/// fans every result into a single bounded channel
pub struct MonitoringScheduler {
    root: CancellationToken,
    registry: RwLock<Registry>,
    loops: TaskTracker,
}

impl MonitoringScheduler {
    /// Create a scheduler bound to `root`; cancelling `root` stops it for good
    pub fn new(
        root: CancellationToken,
        monitors: Vec<Arc<dyn Monitor>>,
    ) -> (Self, mpsc::Receiver<CheckResult>) {
        Self::with_capacity(root, monitors, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(
        root: CancellationToken,
        monitors: Vec<Arc<dyn Monitor>>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<CheckResult>) {
        let (result_tx, result_rx) = mpsc::channel(capacity.max(1));

        let mut registered = HashMap::with_capacity(monitors.len());
        for monitor in monitors {
            let id = monitor.id().to_string();
            if registered.contains_key(&id) {
                warn!("[Scheduler] Duplicate monitor {} in initial set, keeping the first", id);
                continue;
            }
            registered.insert(id, monitor);
        }

        let scheduler = Self {
            root,
            registry: RwLock::new(Registry {
                state: SchedulerState::Created,
                monitors: registered,
                result_tx: Some(result_tx),
            }),
            loops: TaskTracker::new(),
        };

        (scheduler, result_rx)
    }

    /// Run until the root scope is cancelled, then stop and remove every
    /// monitor. Meant to be spawned on its own task.
    pub async fn run(&self) -> Result<(), SchedulerError> {
        {
            let mut registry = self.registry.write().await;
            if registry.state != SchedulerState::Created {
                warn!("[Scheduler] Run called in state {:?}, ignoring", registry.state);
                return Err(SchedulerError::AlreadyStarted(registry.state));
            }
            registry.state = SchedulerState::Running;

            info!("[Scheduler] Running dynamic scheduler with {} monitors", registry.monitors.len());

            if let Some(result_tx) = &registry.result_tx {
                for monitor in registry.monitors.values() {
                    monitor.start(&self.root);
                    self.spawn_loop(monitor.clone(), result_tx.clone());
                }
            }
        }

        self.root.cancelled().await;
        warn!("[Scheduler] Context cancelled, stopping all monitors...");

        {
            let mut registry = self.registry.write().await;
            registry.state = SchedulerState::ShuttingDown;
            for (id, monitor) in registry.monitors.drain() {
                monitor.stop();
                debug!("[Scheduler] Removed monitor {}", id);
            }
        }

        self.loops.close();
        self.loops.wait().await;

        {
            let mut registry = self.registry.write().await;
            registry.result_tx = None;
            registry.state = SchedulerState::Stopped;
        }

        info!("[Scheduler] Scheduler stopped cleanly.");
        Ok(())
    }

    /// Register a monitor and, once running, start its loop.
    ///
    /// Returns `false` when the ID is taken or the scheduler is shutting
    /// down; the existing monitor is left untouched.
    pub async fn add_monitor(&self, monitor: Arc<dyn Monitor>) -> bool {
        let mut registry = self.registry.write().await;
        let id = monitor.id().to_string();

        if registry.monitors.contains_key(&id) {
            warn!("[Scheduler] Monitor {} already exists", id);
            return false;
        }

        match registry.state {
            // `run` starts everything registered before it
            SchedulerState::Created => {
                registry.monitors.insert(id.clone(), monitor);
                info!("[Scheduler] Added monitor {}, starts with the scheduler", id);
                true
            }
            SchedulerState::Running if !self.root.is_cancelled() => {
                let Some(result_tx) = registry.result_tx.clone() else {
                    return false;
                };
                monitor.start(&self.root);
                registry.monitors.insert(id.clone(), monitor.clone());
                self.spawn_loop(monitor, result_tx);
                info!("[Scheduler] Added and started monitor {}", id);
                true
            }
            state => {
                warn!("[Scheduler] Ignoring monitor {}, scheduler is {:?}", id, state);
                false
            }
        }
    }

    /// Stop and remove a monitor; its loop exits on its own scope.
    ///
    /// Returns `false` when no monitor has this ID.
    pub async fn stop_monitor(&self, monitor_id: &str) -> bool {
        let mut registry = self.registry.write().await;

        let Some(monitor) = registry.monitors.remove(monitor_id) else {
            warn!("[Scheduler] No monitor found with ID {}", monitor_id);
            return false;
        };

        monitor.stop();
        info!("[Scheduler] Stopped and removed monitor {}", monitor_id);
        true
    }

    /// Point-in-time snapshot, unordered
    pub async fn list_monitors(&self) -> Vec<Arc<dyn Monitor>> {
        self.registry.read().await.monitors.values().cloned().collect()
    }

    pub async fn get_monitor(&self, monitor_id: &str) -> Option<Arc<dyn Monitor>> {
        self.registry.read().await.monitors.get(monitor_id).cloned()
    }

    pub async fn state(&self) -> SchedulerState {
        self.registry.read().await.state
    }

    /// Root scope, for shutdown listeners
    pub fn cancellation_token(&self) -> CancellationToken {
        self.root.clone()
    }

    fn spawn_loop(&self, monitor: Arc<dyn Monitor>, result_tx: mpsc::Sender<CheckResult>) {
        self.loops.spawn(run_monitor_loop(monitor, result_tx, self.root.clone()));
    }
}

/// Keeps a monitor marked busy until dropped, unwinding included
struct RunningGuard {
    monitor: Arc<dyn Monitor>,
}

impl RunningGuard {
    /// `None` when a check is already in flight
    fn acquire(monitor: Arc<dyn Monitor>) -> Option<Self> {
        monitor.try_acquire().then(|| Self { monitor })
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.monitor.set_running(false);
    }
}

async fn run_monitor_loop(
    monitor: Arc<dyn Monitor>,
    result_tx: mpsc::Sender<CheckResult>,
    root: CancellationToken,
) {
    let Some(token) = monitor.cancellation_token() else {
        warn!("[Scheduler] Monitor {} is not started, loop not launched", monitor.id());
        return;
    };

    launch_check(&monitor, &result_tx, &root);

    let period = monitor.heartbeat_interval().clamp(MIN_TICK_INTERVAL, MAX_TICK_INTERVAL);
    let now = Instant::now();
    let mut ticker = interval_at(now.checked_add(period).unwrap_or(now), period);
    // Ticks missed while busy are dropped, not replayed
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("📡 [Scheduler] Started monitor {} (interval: {:?})", monitor.id(), period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !launch_check(&monitor, &result_tx, &root) {
                    debug!("[Scheduler] Monitor {} still checking, tick skipped", monitor.id());
                }
            }
            _ = token.cancelled() => {
                info!("[Scheduler] Monitor {} stopped", monitor.id());
                return;
            }
            _ = root.cancelled() => {
                info!("[Scheduler] Monitor {} stopping (global shutdown)", monitor.id());
                return;
            }
        }
    }
}

/// Spawn a check unless one is in flight. The busy flag is tested and
/// raised under the monitor's own lock, so loops sharing a monitor still
/// never overlap.
fn launch_check(
    monitor: &Arc<dyn Monitor>,
    result_tx: &mpsc::Sender<CheckResult>,
    root: &CancellationToken,
) -> bool {
    let Some(guard) = RunningGuard::acquire(monitor.clone()) else {
        return false;
    };

    tokio::spawn(perform_check(guard, result_tx.clone(), root.clone()));
    true
}

async fn perform_check(
    guard: RunningGuard,
    result_tx: mpsc::Sender<CheckResult>,
    root: CancellationToken,
) {
    let monitor = &guard.monitor;
    let result = monitor.check(&root).await;
    monitor.set_last_heartbeat(result.end_time);

    // A full channel blocks here and keeps the monitor busy
    tokio::select! {
        biased;
        _ = root.cancelled() => {
            debug!("[Scheduler] Discarding result of {} after shutdown", monitor.id());
        }
        sent = result_tx.send(result) => {
            if sent.is_err() {
                debug!("[Scheduler] Result channel closed");
            }
        }
    }

    drop(guard);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::monitor::MonitorState;
    use crate::monitoring::types::{MonitorStatus, ProbeClock};
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::{sleep, timeout};

    /// Records how many checks overlap
    struct FakeMonitor {
        id: String,
        interval: Duration,
        delay: Duration,
        panic_once: AtomicBool,
        state: MonitorState,
        active: AtomicUsize,
        max_active: AtomicUsize,
        checks: AtomicUsize,
    }

    impl FakeMonitor {
        fn new(id: &str, interval: Duration, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                interval,
                delay,
                panic_once: AtomicBool::new(false),
                state: MonitorState::new(),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                checks: AtomicUsize::new(0),
            })
        }

        fn checks(&self) -> usize {
            self.checks.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Monitor for FakeMonitor {
        fn id(&self) -> &str {
            &self.id
        }

        fn kind(&self) -> &'static str {
            "fake"
        }

        fn start(&self, parent: &CancellationToken) {
            self.state.start(parent);
        }

        fn stop(&self) {
            self.state.stop();
        }

        fn cancellation_token(&self) -> Option<CancellationToken> {
            self.state.token()
        }

        fn is_running(&self) -> bool {
            self.state.is_running()
        }

        fn set_running(&self, running: bool) {
            self.state.set_running(running);
        }

        fn try_acquire(&self) -> bool {
            self.state.try_acquire()
        }

        async fn check(&self, _scope: &CancellationToken) -> CheckResult {
            let clock = ProbeClock::start();
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            self.checks.fetch_add(1, Ordering::SeqCst);

            sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.panic_once.swap(false, Ordering::SeqCst) {
                panic!("probe blew up");
            }

            CheckResult::new(&self.id, "fake").success(clock.stop())
        }

        fn heartbeat_interval(&self) -> Duration {
            self.interval
        }

        fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
            self.state.last_heartbeat()
        }

        fn set_last_heartbeat(&self, at: DateTime<Utc>) {
            self.state.set_last_heartbeat(at);
        }
    }

    fn spawn_run(scheduler: &Arc<MonitoringScheduler>) -> tokio::task::JoinHandle<()> {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            scheduler.run().await.unwrap();
        })
    }

    #[tokio::test]
    async fn test_checks_never_overlap_and_busy_ticks_are_skipped() {
        let monitor = FakeMonitor::new("slow", Duration::from_millis(5), Duration::from_millis(40));
        let root = CancellationToken::new();
        let (scheduler, mut rx) =
            MonitoringScheduler::new(root.clone(), vec![monitor.clone() as Arc<dyn Monitor>]);
        let scheduler = Arc::new(scheduler);
        let handle = spawn_run(&scheduler);

        let mut received = 0;
        while received < 4 {
            let result = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
            assert_eq!(result.monitor_id, "slow");
            received += 1;
        }

        assert_eq!(monitor.max_active.load(Ordering::SeqCst), 1);
        // 40ms checks on a 5ms interval: most ticks must have been skipped
        assert!(monitor.checks() <= 6, "ran {} checks", monitor.checks());

        root.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_first_check_runs_immediately() {
        let monitor = FakeMonitor::new("lazy", Duration::from_secs(3600), Duration::ZERO);
        let root = CancellationToken::new();
        let (scheduler, mut rx) =
            MonitoringScheduler::new(root.clone(), vec![monitor.clone() as Arc<dyn Monitor>]);
        let scheduler = Arc::new(scheduler);
        let handle = spawn_run(&scheduler);

        let result = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(result.status, MonitorStatus::Up);
        assert_eq!(monitor.last_heartbeat(), Some(result.end_time));

        root.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_huge_interval_still_checks_once_and_stops() {
        let monitor = FakeMonitor::new("yearly", Duration::MAX, Duration::ZERO);
        let root = CancellationToken::new();
        let (scheduler, mut rx) =
            MonitoringScheduler::new(root.clone(), vec![monitor.clone() as Arc<dyn Monitor>]);
        let scheduler = Arc::new(scheduler);
        let handle = spawn_run(&scheduler);

        let result = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(result.monitor_id, "yearly");
        assert_eq!(monitor.checks(), 1);

        // The loop is alive and still answers its own scope
        assert!(scheduler.stop_monitor("yearly").await);
        assert!(monitor.cancellation_token().unwrap().is_cancelled());

        root.cancel();
        timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_loops_sharing_a_monitor_never_overlap() {
        let monitor = FakeMonitor::new("shared", Duration::from_millis(2), Duration::from_millis(15));
        let root = CancellationToken::new();
        monitor.start(&root);
        let (result_tx, mut rx) = mpsc::channel(64);

        let loops: Vec<_> = (0..2)
            .map(|_| {
                tokio::spawn(run_monitor_loop(
                    monitor.clone() as Arc<dyn Monitor>,
                    result_tx.clone(),
                    root.clone(),
                ))
            })
            .collect();
        drop(result_tx);

        for _ in 0..4 {
            timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        }

        root.cancel();
        for handle in loops {
            handle.await.unwrap();
        }
        assert_eq!(monitor.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_add_leaves_existing_monitor_untouched() {
        let original = FakeMonitor::new("dup", Duration::from_secs(3600), Duration::ZERO);
        let root = CancellationToken::new();
        let (scheduler, mut rx) =
            MonitoringScheduler::new(root.clone(), vec![original.clone() as Arc<dyn Monitor>]);
        let scheduler = Arc::new(scheduler);
        let handle = spawn_run(&scheduler);

        timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        let heartbeat = original.last_heartbeat();
        let token = original.cancellation_token().unwrap();

        let duplicate = FakeMonitor::new("dup", Duration::from_millis(1), Duration::ZERO);
        assert!(!scheduler.add_monitor(duplicate.clone()).await);

        sleep(Duration::from_millis(20)).await;
        assert!(duplicate.cancellation_token().is_none());
        assert_eq!(duplicate.checks(), 0);
        assert_eq!(original.last_heartbeat(), heartbeat);
        assert!(!token.is_cancelled());
        assert_eq!(original.checks(), 1);

        assert!(!scheduler.stop_monitor("missing").await);
        assert_eq!(scheduler.list_monitors().await.len(), 1);

        root.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_monitor_ends_its_loop_only() {
        let stopped = FakeMonitor::new("a", Duration::from_millis(5), Duration::ZERO);
        let kept = FakeMonitor::new("b", Duration::from_millis(5), Duration::ZERO);
        let root = CancellationToken::new();
        let (scheduler, mut rx) = MonitoringScheduler::new(root.clone(), vec![]);
        let scheduler = Arc::new(scheduler);
        let handle = spawn_run(&scheduler);

        // Wait for the scheduler to be running so adds launch loops directly
        while scheduler.state().await != SchedulerState::Running {
            sleep(Duration::from_millis(1)).await;
        }
        assert!(scheduler.add_monitor(stopped.clone()).await);
        assert!(scheduler.add_monitor(kept.clone()).await);

        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

        sleep(Duration::from_millis(50)).await;
        assert!(scheduler.stop_monitor("a").await);
        assert!(stopped.cancellation_token().unwrap().is_cancelled());

        sleep(Duration::from_millis(20)).await;
        let after_stop = stopped.checks();
        let kept_before = kept.checks();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(stopped.checks(), after_stop);
        assert!(kept.checks() > kept_before);

        let ids: Vec<String> =
            scheduler.list_monitors().await.iter().map(|m| m.id().to_string()).collect();
        assert_eq!(ids, vec!["b".to_string()]);

        root.cancel();
        handle.await.unwrap();
        drain.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_empties_registry_and_closes_channel() {
        let first = FakeMonitor::new("one", Duration::from_millis(5), Duration::from_millis(1));
        let second = FakeMonitor::new("two", Duration::from_millis(7), Duration::from_millis(1));
        let root = CancellationToken::new();
        let monitors: Vec<Arc<dyn Monitor>> = vec![first.clone(), second.clone()];
        let (scheduler, mut rx) = MonitoringScheduler::new(root.clone(), monitors);
        let scheduler = Arc::new(scheduler);
        let handle = spawn_run(&scheduler);

        timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        root.cancel();
        handle.await.unwrap();

        assert_eq!(scheduler.state().await, SchedulerState::Stopped);
        assert!(scheduler.list_monitors().await.is_empty());
        assert!(first.cancellation_token().unwrap().is_cancelled());
        assert!(second.cancellation_token().unwrap().is_cancelled());

        // Only results queued before shutdown remain, then the channel closes
        timeout(Duration::from_secs(1), async { while rx.recv().await.is_some() {} })
            .await
            .unwrap();

        let checks = first.checks() + second.checks();
        sleep(Duration::from_millis(30)).await;
        assert_eq!(first.checks() + second.checks(), checks);

        let late = FakeMonitor::new("late", Duration::ZERO, Duration::ZERO);
        assert!(!scheduler.add_monitor(late).await);
    }

    #[tokio::test]
    async fn test_run_only_once() {
        let root = CancellationToken::new();
        let (scheduler, _rx) = MonitoringScheduler::new(root.clone(), vec![]);
        let scheduler = Arc::new(scheduler);
        let handle = spawn_run(&scheduler);

        while scheduler.state().await == SchedulerState::Created {
            sleep(Duration::from_millis(1)).await;
        }
        assert!(matches!(scheduler.run().await, Err(SchedulerError::AlreadyStarted(_))));

        root.cancel();
        handle.await.unwrap();
        assert!(matches!(
            scheduler.run().await,
            Err(SchedulerError::AlreadyStarted(SchedulerState::Stopped))
        ));
    }

    #[tokio::test]
    async fn test_add_before_run_starts_with_scheduler() {
        let monitor = FakeMonitor::new("early", Duration::from_millis(10), Duration::from_millis(15));
        let root = CancellationToken::new();
        let (scheduler, mut rx) = MonitoringScheduler::new(root.clone(), vec![]);
        let scheduler = Arc::new(scheduler);

        assert!(scheduler.add_monitor(monitor.clone()).await);
        assert!(monitor.cancellation_token().is_none());

        let handle = spawn_run(&scheduler);
        for _ in 0..3 {
            timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        }

        assert!(monitor.cancellation_token().is_some());
        assert_eq!(monitor.max_active.load(Ordering::SeqCst), 1);

        root.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_check_releases_busy_flag() {
        let monitor = FakeMonitor::new("flaky", Duration::from_millis(5), Duration::ZERO);
        monitor.panic_once.store(true, Ordering::SeqCst);
        let root = CancellationToken::new();
        let (scheduler, mut rx) =
            MonitoringScheduler::new(root.clone(), vec![monitor.clone() as Arc<dyn Monitor>]);
        let scheduler = Arc::new(scheduler);
        let handle = spawn_run(&scheduler);

        // The first check panics; later ticks still produce results
        let result = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(result.monitor_id, "flaky");
        assert!(monitor.checks() >= 2);

        root.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_consumer_applies_backpressure() {
        let monitor = FakeMonitor::new("fast", Duration::from_millis(1), Duration::ZERO);
        let root = CancellationToken::new();
        let (scheduler, mut rx) =
            MonitoringScheduler::with_capacity(root.clone(), vec![monitor.clone() as Arc<dyn Monitor>], 2);
        let scheduler = Arc::new(scheduler);
        let handle = spawn_run(&scheduler);

        sleep(Duration::from_millis(50)).await;
        // Two queued, one blocked on send while holding the busy flag
        assert!(monitor.checks() <= 3, "ran {} checks", monitor.checks());
        assert!(monitor.is_running());

        timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        root.cancel();
        handle.await.unwrap();
    }
}
