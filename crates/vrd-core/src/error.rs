//! Configuration errors. All of them are fatal at startup.

use std::path::PathBuf;

use thiserror::Error;

use crate::id::HostError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid local_host: {0}")]
    Host(#[from] HostError),

    #[error("strategy name must not be empty")]
    EmptyStrategyName,

    #[error("duplicate strategy name {0:?}")]
    DuplicateStrategy(String),

    #[error("strategy {strategy:?}: size_limit_bytes must be positive, got {value}")]
    NonPositiveSizeLimit { strategy: String, value: i64 },

    #[error("strategy {strategy:?}: {field} must be greater than zero")]
    ZeroDuration {
        strategy: String,
        field: &'static str,
    },

    #[error("strategy {strategy:?}: unknown selector {selector:?}")]
    UnknownSelector { strategy: String, selector: String },

    #[error("{field} must be greater than zero")]
    ZeroSetting { field: &'static str },
}
