//! Image cache configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::args::CliArgs;
use crate::infrastructure::image::{DEFAULT_SHARDS, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT, default_cache_dir};

pub(crate) const APP_NAME: &str = "imagecache";
pub(crate) const APP_QUALIFIER: &str = "org";
pub(crate) const APP_ORGANIZATION: &str = "imagecache";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
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

/// Configuration for an image controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageCacheConfig {
    /// Directory dedicated to cached image files.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Maximum images kept in memory. Unbounded when absent.
    #[serde(default)]
    pub memory_capacity: Option<usize>,

    /// Maximum simultaneous network fetches.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// `User-Agent` sent with image requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Reject downloads whose image format cannot be recognized.
    #[serde(default = "default_true")]
    pub validate_images: bool,

    /// Number of lock shards for the in-flight registry.
    #[serde(default = "default_registry_shards")]
    pub registry_shards: usize,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path. Logs go to stderr when absent.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

fn default_max_concurrent_fetches() -> usize {
    8
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_registry_shards() -> usize {
    DEFAULT_SHARDS
}

fn default_true() -> bool {
    true
}

impl ImageCacheConfig {
    /// Creates the default configuration rooted at `cache_dir`.
    #[must_use]
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: Some(cache_dir.into()),
            ..Self::default()
        }
    }

    /// Returns the cache directory, falling back to the platform cache dir.
    #[must_use]
    pub fn effective_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }

    /// Returns the HTTP timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }
}

impl Default for ImageCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            memory_capacity: None,
            max_concurrent_fetches: default_max_concurrent_fetches(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: default_user_agent(),
            validate_images: true,
            registry_shards: DEFAULT_SHARDS,
            log_level: LogLevel::Info,
            log_path: None,
        }
    }
}

impl ImageCacheConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(cache_dir) = &args.cache_dir {
            self.cache_dir = Some(cache_dir.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(memory_capacity) = args.memory_capacity {
            self.memory_capacity = Some(memory_capacity);
        }
        if let Some(max_concurrent_fetches) = args.max_concurrent_fetches {
            self.max_concurrent_fetches = max_concurrent_fetches;
        }
        if let Some(timeout_secs) = args.timeout_secs {
            self.timeout_secs = timeout_secs;
        }
    }
}
