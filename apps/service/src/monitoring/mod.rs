/// Monitoring engine module - monitor lifecycle and scheduling
///
/// This module is responsible for:
/// - The `Monitor` contract and the runtime state variants share
/// - Executing HTTP/HTTPS and TCP checks with retries
/// - Classifying outcomes as up, degraded or down
/// - Scheduling one independent loop per monitor and streaming results
pub mod executor;
pub mod http;
pub mod monitor;
pub mod scheduler;
pub mod tcp;
pub mod types;
pub mod validation;

pub use executor::{MonitoringExecutor, ProbeError, RetryPolicy};
pub use http::{HttpMonitor, HttpMonitorConfig};
pub use monitor::{Monitor, MonitorState};
pub use scheduler::{MonitoringScheduler, SchedulerError, SchedulerState};
pub use tcp::{TcpMonitor, TcpMonitorConfig};
pub use types::{CheckResult, IpFamily, MonitorStatus};
