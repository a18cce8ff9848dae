//! Tracing subscriber setup for a CLI run.

use clap::ValueEnum;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of log records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line with event fields at the top level
    #[default]
    Json,
    /// Single-line human-readable records
    #[value(alias = "compact", alias = "text")]
    Pretty,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Pretty => f.write_str("pretty"),
        }
    }
}

/// `RUST_LOG` when set, else `log_level`, else `info`.
fn filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
pub fn init(format: LogFormat, log_level: &str) {
    let registry = tracing_subscriber::registry().with(filter(log_level));
    match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false)
                    .with_timer(fmt::time::UtcTime::rfc_3339()),
            )
            .init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_timer(fmt::time::UtcTime::rfc_3339()),
            )
            .init(),
    }

    tracing::debug!(log_format = %format, log_level, "Logging initialized");
}
