use super::app_config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments.
#[derive(Debug, Default, Parser)]
#[command(
    name = "imagecache",
    version,
    about = "Fetch, import and inspect cached images",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Cache directory.
    #[arg(long, value_name = "PATH", env = "IMAGECACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Maximum images kept in memory.
    #[arg(long)]
    pub memory_capacity: Option<usize>,

    /// Maximum simultaneous downloads.
    #[arg(long)]
    pub max_concurrent_fetches: Option<usize>,

    /// HTTP timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Operation to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Default, Subcommand)]
pub enum Command {
    /// Fetch an image through the cache tiers.
    Fetch {
        /// Image URL.
        url: String,
        /// Write the bytes to this file.
        #[arg(short, long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Move a local file into the disk cache under a URL.
    Import {
        /// File to import.
        file: PathBuf,
        /// URL the file should be cached as.
        url: String,
    },
    /// Show where an image is cached.
    Status {
        /// Image URL.
        url: String,
    },
    /// Delete every cached image.
    Clear,
    /// Show disk cache usage.
    #[default]
    Usage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fetch() {
        let args = CliArgs::parse_from([
            "imagecache",
            "--cache-dir",
            "/tmp/c",
            "fetch",
            "https://example.com/a.png",
            "--out",
            "a.png",
        ]);

        assert_eq!(args.cache_dir, Some(PathBuf::from("/tmp/c")));
        match args.command {
            Command::Fetch { url, out } => {
                assert_eq!(url, "https://example.com/a.png");
                assert_eq!(out, Some(PathBuf::from("a.png")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_import() {
        let args = CliArgs::parse_from(["imagecache", "import", "/tmp/x.jpg", "//foo/bar"]);

        assert!(matches!(args.command, Command::Import { .. }));
    }
}
