//! Structured logging with JSON or human-readable output.

use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

use crate::{TelemetryConfig, TelemetryError};

fn env_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.log_level)
            .map_err(|e| TelemetryError::LoggingInit(format!("invalid log level: {e}"))),
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns `LoggingInit` if the level does not parse or a subscriber is
/// already installed.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let subscriber = tracing_subscriber::registry().with(env_filter(config)?);

    if config.json_logs {
        let json_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);

        subscriber
            .with(json_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    } else {
        let pretty_layer = fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);

        subscriber
            .with(pretty_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_rejected() {
        // RUST_LOG overrides the configured level.
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = TelemetryConfig::new("test").with_log_level("vrd_engine=loud");

        let err = env_filter(&config).unwrap_err();
        assert!(err.to_string().contains("invalid log level"));
    }

    #[test]
    fn test_valid_level_builds_filter() {
        let config = TelemetryConfig::new("test").with_log_level("info,vrd_engine=debug");

        assert!(env_filter(&config).is_ok());
    }
}
