//! `reactord`: an epoll-driven HTTP/1.1 serving engine.
//!
//! One reactor thread owns the readiness facility and the descriptor table;
//! a fixed pool of worker threads runs each connection's request/response
//! state machine; a min-heap expiry queue reaps idle connections on a
//! signal-driven tick.
//!
//! Static files are served zero-copy via memory-mapped `writev`; dynamic
//! requests are dispatched to an external CGI process.

pub mod cgi;
pub mod config;
pub mod connection;
pub mod descriptor_table;
pub mod error;
pub mod expiry;
pub mod parser;
pub mod reactor;
pub mod signal_tick;
pub mod worker_pool;

pub use config::Config;
pub use error::EngineError;
pub use reactor::run;
