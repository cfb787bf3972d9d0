//! Runtime configuration.
//!
//! Every flag can also be supplied through a `RAPTORKV_*` environment
//! variable; an explicit flag wins.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// RaptorKV console configuration
#[derive(Parser, Debug, Clone)]
#[command(name = "raptorkv")]
#[command(about = "Redis-style data structures over an ordered key-value engine")]
#[command(version)]
pub struct Config {
    /// Snapshot file. Without it the database lives in memory only.
    #[arg(long, env = "RAPTORKV_DATA_FILE")]
    pub data_file: Option<PathBuf>,

    /// Seconds between background snapshot flushes (0 disables)
    #[arg(long, env = "RAPTORKV_SAVE_INTERVAL", default_value = "60")]
    pub save_interval: u64,

    /// Password required through AUTH before any other command
    #[arg(long, env = "RAPTORKV_REQUIREPASS")]
    pub requirepass: Option<String>,

    /// Base interval of the expiry sweeper in milliseconds
    #[arg(long, env = "RAPTORKV_SWEEP_INTERVAL_MS", default_value = "100")]
    pub sweep_interval_ms: u64,

    /// Default log filter when RUST_LOG is not set
    #[arg(long, env = "RAPTORKV_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Snapshot flush period, or `None` when periodic flushing is off or
    /// there is nothing to flush to.
    pub fn flush_interval(&self) -> Option<Duration> {
        match (&self.data_file, self.save_interval) {
            (Some(_), secs) if secs > 0 => Some(Duration::from_secs(secs)),
            _ => None,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}
