//! Command-line configuration.
//!
//! The only value a caller must supply is the listening port; worker count,
//! queue capacity, tick period, and buffer sizes all have defaults sized for
//! a small standalone instance.

use std::path::PathBuf;

use clap::Parser;

/// Runtime configuration for a `reactord` instance.
#[derive(Debug, Clone, Parser)]
#[command(name = "reactord", about = "Epoll-driven HTTP/1.1 serving engine")]
pub struct Config {
    /// TCP port to listen on.
    pub port: u16,

    /// Directory served for static GET requests.
    #[arg(long, default_value = "./www")]
    pub doc_root: PathBuf,

    /// Number of worker threads draining the job queue.
    #[arg(long, default_value_t = 8)]
    pub workers: usize,

    /// Maximum number of connections queued for a worker at once.
    #[arg(long, default_value_t = 10_000)]
    pub queue_capacity: usize,

    /// Idle-reaper tick period, in seconds. Idle timeout is 3x this value.
    #[arg(long, default_value_t = 5)]
    pub timeslot_secs: u64,

    /// Upper bound on simultaneously open connections (descriptor table size).
    #[arg(long, default_value_t = 65_536)]
    pub max_connections: usize,

    /// Read-buffer capacity per connection, in bytes.
    #[arg(long, default_value_t = 2048)]
    pub read_buffer_size: usize,

    /// Write-buffer capacity per connection, in bytes (holds the response
    /// head and, for error responses, its inline body).
    #[arg(long, default_value_t = 1024)]
    pub write_buffer_size: usize,
}

impl Config {
    /// The idle-connection timeout: 3x the tick period.
    pub fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeslot_secs * 3)
    }

    /// The tick period itself.
    pub fn timeslot(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeslot_secs)
    }
}
