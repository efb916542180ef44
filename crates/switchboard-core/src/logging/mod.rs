//! Tracing subscriber bootstrap.
//!
//! Hub code only emits `tracing` events; binaries pick the output format
//! here. `RUST_LOG` always wins over the level passed in.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

use tracing_subscriber::EnvFilter;

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber with compact, human-readable stderr output.
///
/// Subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();
    let _ = subscriber.try_init();
}

/// Install the global subscriber with one JSON object per line on stderr.
pub fn init_json_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_writer(std::io::stderr)
        .json()
        .flatten_event(true)
        .with_current_span(true);
    let _ = subscriber.try_init();
}
