//! HTTP/HTTPS monitor, the reference probe variant.

use chrono::{DateTime, Utc};
use reqwest::{Method, redirect};
use serde_json::json;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::OnceLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::executor::{
    MonitoringExecutor, ProbeError, ProbeFailure, ProbeSuccess, RetryPolicy, effective_timeout,
};
use super::monitor::{Monitor, MonitorState};
use super::types::{CheckResult, IpFamily, ProbeClock};

pub const HTTP_KIND: &str = "http/https";

/// Immutable definition of an HTTP monitor
#[derive(Debug, Clone, PartialEq)]
pub struct HttpMonitorConfig {
    pub id: String,
    pub url: String,
    pub interval: Duration,
    /// Extra attempts after the first; negative means none
    pub retries: i32,
    pub retry_interval: Duration,
    /// Per-attempt timeout, zero means the default
    pub timeout: Duration,
    /// `None` keeps the client default, `Some(0)` disables redirects
    pub max_redirects: Option<usize>,
    /// Empty means any 2xx or 3xx
    pub accepted_status_codes: Vec<u16>,
    pub ip_family: IpFamily,
    /// Empty means GET
    pub method: String,
    /// Zero means the default threshold
    pub degraded_threshold: Duration,
}

impl HttpMonitorConfig {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            interval: Duration::from_secs(60),
            retries: 0,
            retry_interval: Duration::from_secs(2),
            timeout: Duration::ZERO,
            max_redirects: None,
            accepted_status_codes: Vec::new(),
            ip_family: IpFamily::Any,
            method: String::new(),
            degraded_threshold: Duration::ZERO,
        }
    }
}

/// Accepted if listed, or within `[200, 400)` when the list is empty
pub fn is_status_accepted(status: u16, accepted: &[u16]) -> bool {
    if accepted.is_empty() {
        return (200..400).contains(&status);
    }
    accepted.contains(&status)
}

pub struct HttpMonitor {
    config: HttpMonitorConfig,
    method: String,
    state: MonitorState,
    client: OnceLock<Result<reqwest::Client, String>>,
}

impl HttpMonitor {
    pub fn new(config: HttpMonitorConfig) -> Self {
        let method = match config.method.trim() {
            "" => "GET".to_string(),
            method => method.to_uppercase(),
        };

        Self { config, method, state: MonitorState::new(), client: OnceLock::new() }
    }

    pub fn config(&self) -> &HttpMonitorConfig {
        &self.config
    }

    /// Normalized request method
    pub fn method(&self) -> &str {
        &self.method
    }

    fn build_client(&self) -> reqwest::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(effective_timeout(self.config.timeout))
            .tcp_keepalive(Duration::from_secs(15))
            .user_agent(concat!("pulse/", env!("CARGO_PKG_VERSION")));

        // Binding the unspecified address of one family pins every connection to it
        builder = match self.config.ip_family {
            IpFamily::V4 => builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            IpFamily::V6 => builder.local_address(IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
            IpFamily::Any => builder,
        };

        builder = match self.config.max_redirects {
            None => builder,
            Some(0) => builder.redirect(redirect::Policy::none()),
            Some(max) => builder.redirect(redirect::Policy::limited(max)),
        };

        builder.build()
    }

    fn client(&self) -> Result<&reqwest::Client, ProbeError> {
        self.client
            .get_or_init(|| self.build_client().map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| ProbeError::ClientUnavailable(e.clone()))
    }

    /// A single request attempt
    async fn probe(&self) -> Result<ProbeSuccess, ProbeFailure> {
        let client = self.client()?;
        let method = Method::from_bytes(self.method.as_bytes())
            .map_err(|e| ProbeError::Request(format!("invalid method {}: {}", self.method, e)))?;
        let url = Url::parse(&self.config.url)
            .map_err(|e| ProbeError::Request(format!("invalid URL {}: {}", self.config.url, e)))?;

        let clock = ProbeClock::start();
        let response = client.request(method, url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(effective_timeout(self.config.timeout))
            } else {
                ProbeError::Http(e)
            }
        })?;
        let timing = clock.stop();

        let code = response.status().as_u16();
        let details = json!({
            "method": self.method,
            "url": self.config.url,
            "status_code": code,
        });

        if !is_status_accepted(code, &self.config.accepted_status_codes) {
            debug!(monitor_id = %self.config.id, code, "Unaccepted status code");
            return Err(ProbeFailure::from(ProbeError::UnacceptedStatus(code)).with_details(details));
        }

        Ok(ProbeSuccess { timing, details: Some(details) })
    }
}

#[async_trait::async_trait]
impl Monitor for HttpMonitor {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn kind(&self) -> &'static str {
        HTTP_KIND
    }

    fn start(&self, parent: &CancellationToken) {
        if !self.state.start(parent) {
            return;
        }

        // Setup failures surface here, checks still report them as Down
        if let Err(e) = self.client() {
            warn!(monitor_id = %self.config.id, "Monitor started without a usable client: {}", e);
        }
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
            HTTP_KIND,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_accepted_range() {
        assert!(is_status_accepted(200, &[]));
        assert!(is_status_accepted(201, &[]));
        assert!(is_status_accepted(399, &[]));
        assert!(!is_status_accepted(400, &[]));
        assert!(!is_status_accepted(404, &[]));
        assert!(!is_status_accepted(199, &[]));
    }

    #[test]
    fn test_explicit_accepted_list() {
        assert!(is_status_accepted(404, &[404]));
        assert!(!is_status_accepted(200, &[204, 404]));
    }

    #[test]
    fn test_method_is_normalized() {
        let monitor = HttpMonitor::new(HttpMonitorConfig::new("m", "http://example.com"));
        assert_eq!(monitor.method(), "GET");

        let monitor = HttpMonitor::new(HttpMonitorConfig {
            method: "head".into(),
            ..HttpMonitorConfig::new("m", "http://example.com")
        });
        assert_eq!(monitor.method(), "HEAD");
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let root = CancellationToken::new();
        let monitor = HttpMonitor::new(HttpMonitorConfig::new("m", "http://example.com"));
        assert!(monitor.cancellation_token().is_none());

        monitor.start(&root);
        let token = monitor.cancellation_token().unwrap();
        monitor.start(&root);
        assert!(!token.is_cancelled());

        monitor.stop();
        assert!(token.is_cancelled());
        monitor.stop();

        monitor.start(&root);
        assert!(!monitor.cancellation_token().unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn test_malformed_url_is_down_not_panic() {
        let root = CancellationToken::new();
        let monitor = HttpMonitor::new(HttpMonitorConfig::new("bad", "not a url"));
        monitor.start(&root);

        let result = monitor.check(&root).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("failed to create request"));
    }
}
