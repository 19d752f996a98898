//! Privilege-separated core-dump ingestion, storage and journal reporting.
//!
//! The crate is organized the way the pipeline actually flows: [`context`] is the shared data
//! model, [`proc`] and [`wire`] belong to the Kernel Frontend, [`pipeline`] and [`special_crash`]
//! belong to the Collector, and [`storage`], [`vacuum`], [`journal`], [`stacktrace`] and
//! [`compress`] are the narrow collaborator traits/impls both sides are built from.

pub mod compress;
pub mod config;
pub mod context;
pub mod error;
pub mod filename;
pub mod journal;
pub mod pipeline;
pub mod privilege;
pub mod proc;
pub mod special_crash;
pub mod stacktrace;
pub mod storage;
pub mod vacuum;
pub mod wire;

use std::env;
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. `COREDUMP_LOG` takes precedence when set (same
/// syntax as `RUST_LOG`); otherwise falls back to `default_level` (normally the configuration
/// record's `log_level`). Safe to call more than once; later calls are no-ops.
pub fn init_logging(default_level: &str) {
    let filter = env::var("COREDUMP_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .unwrap_or_else(|| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Path to the configuration file, overridable with `COREDUMP_CONF` so tests and packagers can
/// point it elsewhere without touching `/etc`.
pub fn config_path() -> std::path::PathBuf {
    env::var("COREDUMP_CONF")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::path::PathBuf::from(config::DEFAULT_CONFIG_PATH))
}
