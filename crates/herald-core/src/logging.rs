//! Global `tracing` subscriber setup.
//!
//! The relay logs to stderr in either a compact human-readable layout or
//! newline-delimited JSON. `RUST_LOG` always takes precedence over the
//! configured level so operators can raise verbosity without editing
//! settings.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Output layout for log lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line human-readable output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global tracing subscriber.
///
/// Call once at startup. Later calls are no-ops, which keeps tests that
/// initialise logging from several places safe.
pub fn init_subscriber(level: &str, format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr);

    let _ = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
