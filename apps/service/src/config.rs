use std::sync::Arc;
use std::time::Duration;
use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitoring::scheduler::DEFAULT_CHANNEL_CAPACITY;
use crate::monitoring::validation::{
    ValidationError, validate_http_monitor, validate_tcp_monitor,
};
use crate::monitoring::{
    HttpMonitor, HttpMonitorConfig, IpFamily, Monitor, TcpMonitor, TcpMonitorConfig,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config {}: {source}", path.display())]
    ReadFailed { path: path::PathBuf, source: std::io::Error },

    #[error("failed to write config {}: {source}", path.display())]
    WriteFailed { path: path::PathBuf, source: std::io::Error },

    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("monitor {id}: {source}")]
    InvalidMonitor { id: String, source: ValidationError },

    #[error("duplicate monitor ID {0}")]
    DuplicateMonitor(String),

    #[error("no config path available, set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Capacity of the result channel shared by all monitors
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default)]
    pub monitors: Vec<MonitorEntry>,
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

/// One `[[monitors]]` table; timing fields are in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MonitorEntry {
    Http(HttpEntry),
    Tcp(TcpEntry),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpEntry {
    pub id: String,
    pub url: String,
    pub interval_ms: u64,
    #[serde(default)]
    pub retries: i32,
    #[serde(default)]
    pub retry_interval_ms: u64,
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_redirects: Option<usize>,
    #[serde(default)]
    pub accepted_status_codes: Vec<u16>,
    #[serde(default)]
    pub ip_family: IpFamily,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub degraded_threshold_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpEntry {
    pub id: String,
    pub address: String,
    pub interval_ms: u64,
    #[serde(default)]
    pub retries: i32,
    #[serde(default)]
    pub retry_interval_ms: u64,
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default)]
    pub ip_family: IpFamily,
    #[serde(default)]
    pub degraded_threshold_ms: u64,
}

impl MonitorEntry {
    pub fn id(&self) -> &str {
        match self {
            MonitorEntry::Http(entry) => &entry.id,
            MonitorEntry::Tcp(entry) => &entry.id,
        }
    }

    /// Validate the entry and build the monitor it describes
    pub fn build(&self) -> Result<Arc<dyn Monitor>, Error> {
        let invalid = |source: ValidationError| Error::InvalidMonitor { id: self.id().to_string(), source };

        match self {
            MonitorEntry::Http(entry) => {
                let config = HttpMonitorConfig::from(entry);
                validate_http_monitor(&config).map_err(invalid)?;
                Ok(Arc::new(HttpMonitor::new(config)))
            }
            MonitorEntry::Tcp(entry) => {
                let config = TcpMonitorConfig::from(entry);
                validate_tcp_monitor(&config).map_err(invalid)?;
                Ok(Arc::new(TcpMonitor::new(config)))
            }
        }
    }
}

impl From<&HttpEntry> for HttpMonitorConfig {
    fn from(entry: &HttpEntry) -> Self {
        Self {
            id: entry.id.clone(),
            url: entry.url.clone(),
            interval: Duration::from_millis(entry.interval_ms),
            retries: entry.retries,
            retry_interval: Duration::from_millis(entry.retry_interval_ms),
            timeout: Duration::from_millis(entry.timeout_ms),
            max_redirects: entry.max_redirects,
            accepted_status_codes: entry.accepted_status_codes.clone(),
            ip_family: entry.ip_family,
            method: entry.method.clone(),
            degraded_threshold: Duration::from_millis(entry.degraded_threshold_ms),
        }
    }
}

impl From<&TcpEntry> for TcpMonitorConfig {
    fn from(entry: &TcpEntry) -> Self {
        Self {
            id: entry.id.clone(),
            address: entry.address.clone(),
            interval: Duration::from_millis(entry.interval_ms),
            retries: entry.retries,
            retry_interval: Duration::from_millis(entry.retry_interval_ms),
            timeout: Duration::from_millis(entry.timeout_ms),
            ip_family: entry.ip_family,
            degraded_threshold: Duration::from_millis(entry.degraded_threshold_ms),
        }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/pulse/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("pulse/config.toml"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            monitors: vec![MonitorEntry::Http(HttpEntry {
                id: "example".into(),
                url: "https://example.com/".into(),
                interval_ms: 60_000,
                retries: 3,
                retry_interval_ms: 2_000,
                timeout_ms: 5_000,
                max_redirects: None,
                accepted_status_codes: vec![200],
                ip_family: IpFamily::Any,
                method: "GET".into(),
                degraded_threshold_ms: 2_000,
            })],
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Monitoring Configuration:")?;
        write_1(f, "Result Channel Capacity", &self.channel_capacity)?;
        for entry in &self.monitors {
            match entry {
                MonitorEntry::Http(http) => {
                    write_title_1(f, &format!("HTTP monitor {}", http.id))?;
                    write_1(f, "URL", &http.url)?;
                    write_1(f, "Interval (ms)", &http.interval_ms)?;
                    write_1(f, "Retries", &http.retries)?;
                }
                MonitorEntry::Tcp(tcp) => {
                    write_title_1(f, &format!("TCP monitor {}", tcp.id))?;
                    write_1(f, "Address", &tcp.address)?;
                    write_1(f, "Interval (ms)", &tcp.interval_ms)?;
                    write_1(f, "Retries", &tcp.retries)?;
                }
            }
        }

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/pulse/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            Self::parse(&raw_string)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    pub fn parse(raw: &str) -> Result<Self, Error> {
        Ok(toml::from_str(raw)?)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }

    /// Validate every entry and build the monitor set, rejecting duplicate IDs
    pub fn build_monitors(&self) -> Result<Vec<Arc<dyn Monitor>>, Error> {
        let mut monitors: Vec<Arc<dyn Monitor>> = Vec::with_capacity(self.monitors.len());

        for entry in &self.monitors {
            if monitors.iter().any(|m| m.id() == entry.id()) {
                return Err(Error::DuplicateMonitor(entry.id().to_string()));
            }
            monitors.push(entry.build()?);
        }

        Ok(monitors)
    }
}
