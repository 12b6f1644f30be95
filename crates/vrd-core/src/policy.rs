//! Acceptance policy for remote duplication requests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which remote instances may duplicate this instance's videos.
///
/// Parsing is closed: any value other than the three variants is rejected
/// when the configuration is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceptancePolicy {
    /// Deny every request.
    Nobody,
    /// Allow hosts this instance follows with an accepted follow.
    #[default]
    Followings,
    /// Allow every request.
    Anybody,
}

impl AcceptancePolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nobody => "nobody",
            Self::Followings => "followings",
            Self::Anybody => "anybody",
        }
    }
}

impl fmt::Display for AcceptancePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcceptancePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nobody" => Ok(Self::Nobody),
            "followings" => Ok(Self::Followings),
            "anybody" => Ok(Self::Anybody),
            other => Err(format!(
                "unknown acceptance policy {other:?} (expected nobody, followings or anybody)"
            )),
        }
    }
}
