//! Monitor definition validation.
//!
//! Definitions are checked once, before a monitor is built, so a bad entry is
//! reported at load time instead of as an endless stream of Down results.

use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::http::HttpMonitorConfig;
use super::tcp::TcpMonitorConfig;

const MAX_INTERVAL: Duration = Duration::from_secs(86400);
const MAX_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("monitor ID must not be empty")]
    EmptyId,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid scheme for HTTP monitor: {0}")]
    InvalidScheme(String),

    #[error("TCP target must be in format host:port, got {0}")]
    InvalidAddress(String),

    #[error("port 0 is not valid")]
    InvalidPort,

    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("check interval must be between 1ms and {max:?}, got {got:?}")]
    Interval { got: Duration, max: Duration },

    #[error("timeout too long: {got:?} (maximum: {max:?})")]
    Timeout { got: Duration, max: Duration },

    #[error("accepted status code {0} is outside 100-599")]
    StatusCode(u16),
}

pub fn validate_http_monitor(config: &HttpMonitorConfig) -> Result<(), ValidationError> {
    validate_id(&config.id)?;
    validate_http_target(&config.url)?;
    validate_check_interval(config.interval)?;
    validate_timeout(config.timeout)?;

    if !config.method.is_empty() && reqwest::Method::from_bytes(config.method.as_bytes()).is_err() {
        return Err(ValidationError::InvalidMethod(config.method.clone()));
    }

    if let Some(code) = config.accepted_status_codes.iter().find(|c| !(100..600).contains(*c)) {
        return Err(ValidationError::StatusCode(*code));
    }

    Ok(())
}

pub fn validate_tcp_monitor(config: &TcpMonitorConfig) -> Result<(), ValidationError> {
    validate_id(&config.id)?;
    validate_tcp_target(&config.address)?;
    validate_check_interval(config.interval)?;
    validate_timeout(config.timeout)
}

fn validate_id(id: &str) -> Result<(), ValidationError> {
    if id.trim().is_empty() {
        return Err(ValidationError::EmptyId);
    }
    Ok(())
}

/// Validate HTTP/HTTPS target
fn validate_http_target(target: &str) -> Result<(), ValidationError> {
    let url = Url::parse(target).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ValidationError::InvalidScheme(other.to_string())),
    }

    if url.host_str().is_none() {
        return Err(ValidationError::InvalidUrl(format!("{} has no host", target)));
    }

    if url.port() == Some(0) {
        return Err(ValidationError::InvalidPort);
    }

    Ok(())
}

/// Validate TCP target, `host:port` or `[v6]:port`
fn validate_tcp_target(target: &str) -> Result<(), ValidationError> {
    let Some((host, port)) = target.rsplit_once(':') else {
        return Err(ValidationError::InvalidAddress(target.to_string()));
    };

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(ValidationError::InvalidAddress(target.to_string()));
    }

    let port: u16 = port.parse().map_err(|_| ValidationError::InvalidAddress(target.to_string()))?;
    if port == 0 {
        return Err(ValidationError::InvalidPort);
    }

    Ok(())
}

/// Zero intervals would spin the loop
pub fn validate_check_interval(interval: Duration) -> Result<(), ValidationError> {
    if interval.is_zero() || interval > MAX_INTERVAL {
        return Err(ValidationError::Interval { got: interval, max: MAX_INTERVAL });
    }
    Ok(())
}

/// Zero is allowed and means the default
pub fn validate_timeout(timeout: Duration) -> Result<(), ValidationError> {
    if timeout > MAX_TIMEOUT {
        return Err(ValidationError::Timeout { got: timeout, max: MAX_TIMEOUT });
    }
    Ok(())
}
