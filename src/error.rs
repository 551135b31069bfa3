//! Errors that can abort startup or a worker thread.
//!
//! Per-request failures (bad syntax, missing file, CGI exec failure) are not
//! modeled here; they are routed through [`crate::parser::Status`] or a
//! closed connection, never through a Rust `Result` crossing a thread
//! boundary.

use thiserror::Error;

/// Failures that can prevent the engine from starting or keep running.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The listening socket could not be bound or configured.
    #[error("failed to bind listener on port {port}: {source}")]
    Bind {
        /// TCP port that was requested.
        port: u16,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// `mio::Poll` could not be created or the listener could not be registered.
    #[error("failed to initialize readiness facility: {0}")]
    Poll(#[source] std::io::Error),

    /// The `SIGALRM` tick source could not be registered.
    #[error("failed to register tick signal: {0}")]
    SignalRegistration(#[source] std::io::Error),

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread {index}: {source}")]
    WorkerSpawn {
        /// Index of the worker that failed to start.
        index: usize,
        /// Underlying OS failure.
        #[source]
        source: std::io::Error,
    },

    /// The document root does not exist or is not a directory.
    #[error("document root {path:?} is not a usable directory")]
    DocRoot {
        /// Path that was rejected.
        path: std::path::PathBuf,
    },
}
