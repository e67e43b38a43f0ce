//! Pipeline settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::application::services::ManagerConfig;
use crate::infrastructure::image::CacheConfig;
use crate::infrastructure::network::FetcherConfig;

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Converts to tracing level.
    #[must_use]
    pub const fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Settings for the whole pipeline, loaded from `config.toml`.
///
/// Every field has a default, so partial files parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Log verbosity level.
    pub log_level: LogLevel,

    /// Log file path; logs go to stderr when unset.
    pub log_path: Option<PathBuf>,

    /// Memory and disk cache.
    pub cache: CacheConfig,

    /// HTTP fetcher.
    pub network: FetcherConfig,

    /// Load coordination.
    pub manager: ManagerConfig,
}
