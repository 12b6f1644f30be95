//! Follow-graph facts consumed from the social layer.

use serde::{Deserialize, Serialize};

use crate::id::Host;

/// State of a follow relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowState {
    Pending,
    Accepted,
}

/// "`follower_host` follows `following_host`", as reported by the social layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FollowFact {
    pub follower_host: Host,
    pub following_host: Host,
    pub state: FollowState,
}

impl FollowFact {
    #[must_use]
    pub const fn accepted(follower_host: Host, following_host: Host) -> Self {
        Self {
            follower_host,
            following_host,
            state: FollowState::Accepted,
        }
    }

    #[must_use]
    pub const fn pending(follower_host: Host, following_host: Host) -> Self {
        Self {
            follower_host,
            following_host,
            state: FollowState::Pending,
        }
    }

    /// True if this fact proves an accepted `follower -> following` edge.
    #[must_use]
    pub fn proves(&self, follower: &Host, following: &Host) -> bool {
        self.state == FollowState::Accepted
            && &self.follower_host == follower
            && &self.following_host == following
    }
}
