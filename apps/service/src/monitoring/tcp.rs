//! TCP connect monitor: up when a connection to `host:port` opens in time.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::executor::{
    MonitoringExecutor, ProbeError, ProbeFailure, ProbeSuccess, RetryPolicy, effective_timeout,
};
use super::monitor::{Monitor, MonitorState};
use super::types::{CheckResult, IpFamily, ProbeClock};

pub const TCP_KIND: &str = "tcp";

#[derive(Debug, Clone, PartialEq)]
pub struct TcpMonitorConfig {
    pub id: String,
    /// `host:port`
    pub address: String,
    pub interval: Duration,
    pub retries: i32,
    pub retry_interval: Duration,
    pub timeout: Duration,
    pub ip_family: IpFamily,
    pub degraded_threshold: Duration,
}

impl TcpMonitorConfig {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            interval: Duration::from_secs(60),
            retries: 0,
            retry_interval: Duration::from_secs(2),
            timeout: Duration::ZERO,
            ip_family: IpFamily::Any,
            degraded_threshold: Duration::ZERO,
        }
    }
}

pub struct TcpMonitor {
    config: TcpMonitorConfig,
    state: MonitorState,
}

impl TcpMonitor {
    pub fn new(config: TcpMonitorConfig) -> Self {
        Self { config, state: MonitorState::new() }
    }

    pub fn config(&self) -> &TcpMonitorConfig {
        &self.config
    }

    async fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        let family = self.config.ip_family;
        let addrs: Vec<SocketAddr> =
            lookup_host(&self.config.address).await?.filter(|addr| family.allows(addr)).collect();

        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no {:?} address for {}", family, self.config.address),
            ));
        }
        Ok(addrs)
    }

    /// Resolution and connect share one timeout
    async fn probe(&self) -> Result<ProbeSuccess, ProbeFailure> {
        let limit = effective_timeout(self.config.timeout);
        let clock = ProbeClock::start();

        let connect = async {
            let addrs = self.resolve().await?;
            TcpStream::connect(&addrs[..]).await
        };

        let stream = timeout(limit, connect).await.map_err(|_| ProbeError::Timeout(limit))??;
        let timing = clock.stop();

        let peer = stream.peer_addr().map(|addr| addr.to_string()).ok();
        Ok(ProbeSuccess {
            timing,
            details: Some(json!({ "address": self.config.address, "peer": peer })),
        })
    }
}

#[async_trait::async_trait]
impl Monitor for TcpMonitor {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn kind(&self) -> &'static str {
        TCP_KIND
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

    async fn check(&self, scope: &CancellationToken) -> CheckResult {
        let token = self.state.token_or(scope);
        let executor = MonitoringExecutor::new(
            &self.config.id,
            TCP_KIND,
            RetryPolicy::new(self.config.retries, self.config.retry_interval),
            self.config.degraded_threshold,
        );

        executor.execute(&token, move || self.probe()).await
    }

    fn heartbeat_interval(&self) -> Duration {
        self.config.interval
    }

    fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.state.last_heartbeat()
    }

    fn set_last_heartbeat(&self, at: DateTime<Utc>) {
        self.state.set_last_heartbeat(at);
    }
}
