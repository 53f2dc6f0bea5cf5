use std::env::var;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Output layout of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, for log shippers.
    Json,
    /// Multi-line human layout with source locations.
    Pretty,
    /// Single-line human layout.
    Compact,
}

impl LogFormat {
    /// Resolve the format from `RUST_LOG_FORMAT`, then `APP_ENV`.
    ///
    /// `APP_ENV=production` selects JSON unless a format was requested
    /// explicitly.
    pub fn from_env() -> Self {
        Self::resolve(var("RUST_LOG_FORMAT").ok().as_deref(), var("APP_ENV").ok().as_deref())
    }

    fn resolve(format: Option<&str>, app_env: Option<&str>) -> Self {
        match format.map(str::to_ascii_lowercase).as_deref() {
            Some("json") => Self::Json,
            Some("pretty") => Self::Pretty,
            Some(_) => Self::Compact,
            None if app_env == Some("production") => Self::Json,
            None => Self::Compact,
        }
    }
}

pub fn init() {
    init_with_level(LevelFilter::INFO);
}

/// Install the global subscriber; `RUST_LOG` overrides `level`.
///
/// Calling this twice is harmless, the second installation is ignored.
pub fn init_with_level(level: LevelFilter) {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let log_layer = match LogFormat::from_env() {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().pretty().with_filter(env_filter).boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_filter(env_filter)
            .boxed(),
    };

    let _ = tracing_subscriber::registry().with(log_layer).try_init();
}
