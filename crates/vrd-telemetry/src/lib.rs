//! Logging setup for the video redundancy engine.
//!
//! Every engine component logs through `tracing` with structured fields
//! (`strategy`, `record_id`, `artifact`, `host`, `reason`). This crate
//! installs the subscriber that renders them.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use vrd_telemetry::{TelemetryConfig, init_telemetry};
//!
//! let config = vrd_core::EngineConfig::load("redundancy.toml")?;
//! init_telemetry(&TelemetryConfig::from(&config.logging))?;
//!
//! tracing::info!(local_host = %config.local_host, "Starting up");
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod logging;

pub use logging::init_logging;

use vrd_core::LoggingConfig;

/// Configuration for telemetry initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event.
    pub service_name: String,

    /// Log level filter (e.g., "info", "`vrd_engine=debug`").
    pub log_level: String,

    /// Enable JSON log output.
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "vrd".to_string(),
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration with the given service name.
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    #[must_use]
    pub const fn with_json_logs(mut self, enabled: bool) -> Self {
        self.json_logs = enabled;
        self
    }
}

impl From<&LoggingConfig> for TelemetryConfig {
    fn from(logging: &LoggingConfig) -> Self {
        Self::default()
            .with_log_level(logging.level.clone())
            .with_json_logs(logging.json)
    }
}

/// Initialize the telemetry system.
///
/// Call once at startup. `RUST_LOG` takes precedence over `log_level`.
///
/// # Errors
///
/// Returns `LoggingInit` if the filter is invalid or a global subscriber is
/// already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    init_logging(config)?;
    tracing::info!(
        service = %config.service_name,
        json = config.json_logs,
        "Telemetry initialized"
    );
    Ok(())
}

/// Telemetry error type.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to initialize logging.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();

        assert_eq!(config.service_name, "vrd");
        assert_eq!(config.log_level, "info");
        assert!(config.json_logs);
    }

    #[test]
    fn test_telemetry_config_builder_chain() {
        let config = TelemetryConfig::new("redundancy")
            .with_log_level("vrd_engine=debug")
            .with_json_logs(false);

        assert_eq!(config.service_name, "redundancy");
        assert_eq!(config.log_level, "vrd_engine=debug");
        assert!(!config.json_logs);
    }

    #[test]
    fn test_telemetry_config_from_logging_section() {
        let logging = LoggingConfig {
            level: "warn".to_string(),
            json: false,
        };

        let config = TelemetryConfig::from(&logging);

        assert_eq!(config.log_level, "warn");
        assert!(!config.json_logs);
        assert_eq!(config.service_name, "vrd");
    }

    #[test]
    fn test_telemetry_error_logging_init() {
        let error = TelemetryError::LoggingInit("already set".to_string());
        let error_str = format!("{error}");

        assert!(error_str.contains("Failed to initialize logging"));
        assert!(error_str.contains("already set"));
    }
}
