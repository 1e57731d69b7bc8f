//! mm-daemon: the background indexing/query daemon.
//!
//! This crate provides:
//! - `Services`, the constructed context (Catalog, VectorStore, EncoderPool,
//!   TaskQueue) shared across the socket listener and every worker loop
//! - the Orchestrator driving ingestion from the TaskQueue
//! - the directory watcher feeding the TaskQueue from filesystem events
//! - the newline-delimited-JSON wire protocol spoken over the admin socket
//! - config loading

pub mod config;
pub mod orchestrator;
pub mod protocol;
pub mod service;
pub mod watcher;

pub use config::{default_config_path, default_pid_path, default_socket_path, load_config, Config};
pub use orchestrator::Orchestrator;
pub use protocol::{Request, Response};
pub use service::Services;
pub use watcher::{FileEvent, FileEventKind, FileWatcher};
