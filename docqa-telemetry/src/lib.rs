//! Process-wide structured logging for the docqa services.
//!
//! Binaries call [`init_from_env`] once at startup. Filtering follows
//! `RUST_LOG` (default `info`); the output format follows `DOCQA_LOG_FORMAT`
//! (`pretty`, `compact` or `json`, default `compact`).
//!
//! ```rust,ignore
//! docqa_telemetry::init_from_env("docqa")?;
//! tracing::info!(port = 5007, "listening");
//! ```
//!
//! Tests that assert on log output install a [`CaptureLayer`] instead.

pub mod capture;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub use capture::{CaptureLayer, CapturedEvent, EventLog};

/// Environment variable selecting the [`LogFormat`].
pub const LOG_FORMAT_ENV: &str = "DOCQA_LOG_FORMAT";

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("unknown log format '{0}' (expected pretty, compact or json)")]
    UnknownFormat(String),

    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Output format of the fmt subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human readable.
    Pretty,
    /// One line per event.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(TelemetryError::UnknownFormat(other.to_string())),
        }
    }
}

/// The `RUST_LOG` filter, or [`DEFAULT_FILTER`].
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber.
///
/// Returns [`TelemetryError::AlreadyInitialized`] if a global subscriber is
/// already set, so repeated calls are harmless.
pub fn init_logging(service_name: &str, format: LogFormat) -> Result<(), TelemetryError> {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter()).with_target(true);
    let installed = match format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };
    installed.map_err(|_| TelemetryError::AlreadyInitialized)?;

    tracing::info!(service = service_name, format = %format, "logging initialized");
    Ok(())
}

/// Install the global subscriber with the format named by [`LOG_FORMAT_ENV`].
pub fn init_from_env(service_name: &str) -> Result<(), TelemetryError> {
    let format = match std::env::var(LOG_FORMAT_ENV) {
        Ok(value) if !value.trim().is_empty() => value.parse()?,
        _ => LogFormat::default(),
    };
    init_logging(service_name, format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_parse_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" pretty ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!(
            "xml".parse::<LogFormat>().unwrap_err(),
            TelemetryError::UnknownFormat("xml".into())
        );
        assert_eq!(LogFormat::default().to_string(), "compact");
    }

    #[test]
    fn second_initialization_is_an_error_not_a_panic() {
        // Only this test touches the global subscriber.
        let first = init_logging("telemetry-test", LogFormat::Compact);
        assert!(first.is_ok());
        assert_eq!(
            init_logging("telemetry-test", LogFormat::Json),
            Err(TelemetryError::AlreadyInitialized)
        );
    }
}
