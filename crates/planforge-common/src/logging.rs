//! Tracing initialization.
//!
//! One-time setup for a `tracing-subscriber` `fmt` layer driven by
//! `RUST_LOG` (or `default_level` when unset). Mirrors the teacher's
//! `tracing`-based logging, scaled down to what a library core needs:
//! no OTLP exporters, no progress bars, no JSONL file sinks.

use tracing_subscriber::EnvFilter;

/// Initializes a process-global `tracing` subscriber.
///
/// Safe to call more than once; subsequent calls are no-ops (mirrors
/// `tracing_subscriber::fmt().try_init()` semantics).
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
