//! Pulse - periodic endpoint monitoring
//!
//! A [`MonitoringScheduler`] owns a set of [`Monitor`]s, runs one independent
//! check loop per monitor and streams every [`CheckResult`] through a single
//! bounded channel.

pub mod config;
pub mod monitoring;

pub use monitoring::{
    CheckResult, HttpMonitor, HttpMonitorConfig, Monitor, MonitorStatus, MonitoringScheduler,
    TcpMonitor, TcpMonitorConfig,
};
