//! Tracing subscriber initialization for the runner binary.
//!
//! Structured logging throughout this codebase goes through `tracing`'s
//! `info!`/`debug!`/`warn!`/`error!` macros with key-value fields rather than
//! interpolated strings; this module just wires up where those events go.

use tracing_subscriber::EnvFilter;

/// Install an `EnvFilter`-driven `fmt` subscriber as the global default.
///
/// Respects `RUST_LOG` (e.g. `RUST_LOG=chatflow_orchestrator=debug,info`),
/// falling back to `info` when unset or invalid.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
