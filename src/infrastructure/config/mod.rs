//! Configuration loading.

pub mod app_config;
/// Command-line arguments.
pub mod args;
/// Config file storage.
pub mod storage;

pub use app_config::{ImageCacheConfig, LogLevel};
pub use args::{CliArgs, Command};
pub use storage::{ConfigError, ConfigStore};
