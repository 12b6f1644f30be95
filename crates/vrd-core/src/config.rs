//! Engine configuration.
//!
//! The TOML file is deserialized into a raw shape and then validated into
//! [`EngineConfig`]. Everything that reaches the engine at runtime has already
//! passed [`EngineConfig::validate`]; there is no reload path.
//!
//! ```toml
//! local_host = "videos.example.org"
//! accept_from = "followings"
//! reaper_interval_secs = 60
//!
//! [[strategies]]
//! name = "recently-added"
//! min_lifetime_secs = 86400
//! size_limit_bytes = 10737418240
//! min_views = 10
//! check_interval_secs = 3600
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::id::{Host, StrategyName};
use crate::policy::AcceptancePolicy;

/// Default interval of the expiration reaper.
pub const DEFAULT_REAPER_INTERVAL_SECS: u64 = 60;

/// Default number of replications allowed to run at once.
pub const DEFAULT_MAX_CONCURRENT_REPLICATIONS: usize = 4;

/// Default window for an origin to confirm a duplication request.
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 30;

/// Default number of videos a selector pulls from the catalog per tick.
pub const DEFAULT_CANDIDATE_BATCH_SIZE: usize = 50;

const DEFAULT_STORAGE_DIR: &str = "storage/redundancy";

/// Candidate ordering used by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectorKind {
    /// Most recently published first, with a view-count floor.
    RecentlyAdded,
    /// Highest view count first.
    MostViews,
    /// Highest recent-view score first.
    Trending,
}

impl SelectorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RecentlyAdded => "recently-added",
            Self::MostViews => "most-views",
            Self::Trending => "trending",
        }
    }
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectorKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recently-added" => Ok(Self::RecentlyAdded),
            "most-views" => Ok(Self::MostViews),
            "trending" => Ok(Self::Trending),
            _ => Err(()),
        }
    }
}

/// One configured redundancy strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedundancyStrategyConfig {
    /// Unique name; also the `strategy` stored on records it owns.
    pub name: StrategyName,
    pub selector: SelectorKind,
    /// How long a video must exist before it is eligible. Also the expiry
    /// horizon of records this strategy creates or refreshes.
    pub min_lifetime: Duration,
    /// Cap on the summed size of every record this strategy owns.
    pub size_limit_bytes: u64,
    pub min_views: u64,
    pub check_interval: Duration,
}

impl RedundancyStrategyConfig {
    /// Strategy named after its selector, with one-hour lifetime and interval.
    #[must_use]
    pub fn new(selector: SelectorKind, size_limit_bytes: u64) -> Self {
        Self {
            name: StrategyName::new(selector.as_str()),
            selector,
            min_lifetime: Duration::from_secs(3600),
            size_limit_bytes,
            min_views: 0,
            check_interval: Duration::from_secs(3600),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = StrategyName::new(name);
        self
    }

    #[must_use]
    pub const fn with_min_lifetime(mut self, min_lifetime: Duration) -> Self {
        self.min_lifetime = min_lifetime;
        self
    }

    #[must_use]
    pub const fn with_min_views(mut self, min_views: u64) -> Self {
        self.min_views = min_views;
        self
    }

    #[must_use]
    pub const fn with_check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    /// Expiry for a record created or re-confirmed at `now`.
    #[must_use]
    pub fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.min_lifetime)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Newest publication time a video may have to be eligible at `now`.
    #[must_use]
    pub fn published_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.min_lifetime)
            .ok()
            .and_then(|delta| now.checked_sub_signed(delta))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let strategy = self.name.as_str();
        if strategy.trim().is_empty() {
            return Err(ConfigError::EmptyStrategyName);
        }
        if self.size_limit_bytes == 0 {
            return Err(ConfigError::NonPositiveSizeLimit {
                strategy: strategy.to_string(),
                value: 0,
            });
        }
        if self.min_lifetime.is_zero() {
            return Err(ConfigError::ZeroDuration {
                strategy: strategy.to_string(),
                field: "min_lifetime_secs",
            });
        }
        if self.check_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                strategy: strategy.to_string(),
                field: "check_interval_secs",
            });
        }
        Ok(())
    }
}

/// Logging section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

/// Validated engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// This instance's federation host.
    pub local_host: Host,
    pub accept_from: AcceptancePolicy,
    pub strategies: Vec<RedundancyStrategyConfig>,
    pub reaper_interval: Duration,
    pub max_concurrent_replications: usize,
    /// How long to wait for an origin to confirm a duplication request.
    pub confirmation_timeout: Duration,
    /// Root directory for locally stored artifact bytes.
    pub storage_dir: PathBuf,
    pub candidate_batch_size: usize,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Configuration with defaults and no strategies.
    #[must_use]
    pub fn new(local_host: Host) -> Self {
        Self {
            local_host,
            accept_from: AcceptancePolicy::default(),
            strategies: Vec::new(),
            reaper_interval: Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS),
            max_concurrent_replications: DEFAULT_MAX_CONCURRENT_REPLICATIONS,
            confirmation_timeout: Duration::from_secs(DEFAULT_CONFIRMATION_TIMEOUT_SECS),
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            candidate_batch_size: DEFAULT_CANDIDATE_BATCH_SIZE,
            logging: LoggingConfig::default(),
        }
    }

    #[must_use]
    pub const fn with_accept_from(mut self, accept_from: AcceptancePolicy) -> Self {
        self.accept_from = accept_from;
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: RedundancyStrategyConfig) -> Self {
        self.strategies.push(strategy);
        self
    }

    #[must_use]
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    #[must_use]
    pub const fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: RawEngineConfig = toml::from_str(input)?;
        let config = Self::try_from(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    /// Check invariants that do not depend on the input format.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for strategy in &self.strategies {
            strategy.validate()?;
            if !seen.insert(strategy.name.as_str()) {
                return Err(ConfigError::DuplicateStrategy(strategy.name.to_string()));
            }
        }
        if self.reaper_interval.is_zero() {
            return Err(ConfigError::ZeroSetting {
                field: "reaper_interval_secs",
            });
        }
        if self.max_concurrent_replications == 0 {
            return Err(ConfigError::ZeroSetting {
                field: "max_concurrent_replications",
            });
        }
        if self.confirmation_timeout.is_zero() {
            return Err(ConfigError::ZeroSetting {
                field: "confirmation_timeout_secs",
            });
        }
        if self.candidate_batch_size == 0 {
            return Err(ConfigError::ZeroSetting {
                field: "candidate_batch_size",
            });
        }
        Ok(())
    }

    /// Look up a strategy by name.
    #[must_use]
    pub fn strategy(&self, name: &StrategyName) -> Option<&RedundancyStrategyConfig> {
        self.strategies.iter().find(|s| &s.name == name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Raw (file) shape
// ─────────────────────────────────────────────────────────────────────────────

const fn default_reaper_interval_secs() -> u64 {
    DEFAULT_REAPER_INTERVAL_SECS
}

const fn default_max_concurrent_replications() -> usize {
    DEFAULT_MAX_CONCURRENT_REPLICATIONS
}

const fn default_confirmation_timeout_secs() -> u64 {
    DEFAULT_CONFIRMATION_TIMEOUT_SECS
}

const fn default_candidate_batch_size() -> usize {
    DEFAULT_CANDIDATE_BATCH_SIZE
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STORAGE_DIR)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEngineConfig {
    local_host: String,
    #[serde(default)]
    accept_from: AcceptancePolicy,
    #[serde(default)]
    strategies: Vec<RawStrategyConfig>,
    #[serde(default = "default_reaper_interval_secs")]
    reaper_interval_secs: u64,
    #[serde(default = "default_max_concurrent_replications")]
    max_concurrent_replications: usize,
    #[serde(default = "default_confirmation_timeout_secs")]
    confirmation_timeout_secs: u64,
    #[serde(default = "default_storage_dir")]
    storage_dir: PathBuf,
    #[serde(default = "default_candidate_batch_size")]
    candidate_batch_size: usize,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStrategyConfig {
    name: String,
    #[serde(default)]
    selector: Option<String>,
    min_lifetime_secs: u64,
    /// Signed so that negative values are reported instead of failing to parse.
    size_limit_bytes: i64,
    #[serde(default)]
    min_views: u64,
    check_interval_secs: u64,
}

impl TryFrom<RawStrategyConfig> for RedundancyStrategyConfig {
    type Error = ConfigError;

    fn try_from(raw: RawStrategyConfig) -> Result<Self, Self::Error> {
        let selector_name = raw.selector.as_deref().unwrap_or(&raw.name);
        let selector =
            selector_name
                .parse::<SelectorKind>()
                .map_err(|()| ConfigError::UnknownSelector {
                    strategy: raw.name.clone(),
                    selector: selector_name.to_string(),
                })?;
        let size_limit_bytes = u64::try_from(raw.size_limit_bytes)
            .ok()
            .filter(|limit| *limit > 0)
            .ok_or_else(|| ConfigError::NonPositiveSizeLimit {
                strategy: raw.name.clone(),
                value: raw.size_limit_bytes,
            })?;

        Ok(Self {
            name: StrategyName::new(raw.name),
            selector,
            min_lifetime: Duration::from_secs(raw.min_lifetime_secs),
            size_limit_bytes,
            min_views: raw.min_views,
            check_interval: Duration::from_secs(raw.check_interval_secs),
        })
    }
}

impl TryFrom<RawEngineConfig> for EngineConfig {
    type Error = ConfigError;

    fn try_from(raw: RawEngineConfig) -> Result<Self, Self::Error> {
        let strategies = raw
            .strategies
            .into_iter()
            .map(RedundancyStrategyConfig::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            local_host: Host::parse(&raw.local_host)?,
            accept_from: raw.accept_from,
            strategies,
            reaper_interval: Duration::from_secs(raw.reaper_interval_secs),
            max_concurrent_replications: raw.max_concurrent_replications,
            confirmation_timeout: Duration::from_secs(raw.confirmation_timeout_secs),
            storage_dir: raw.storage_dir,
            candidate_batch_size: raw.candidate_batch_size,
            logging: raw.logging,
        })
    }
}
