//! Trust policy for inbound duplication requests.

use std::sync::Arc;

use serde::Serialize;
use vrd_core::{AcceptancePolicy, DenyReason, DuplicationRequest, Host};

use crate::collaborators::FollowGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Deny,
}

/// Why the gate decided the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    PolicyAnybody,
    PolicyNobody,
    FollowedByUs,
    NotFollowed,
}

impl GateReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PolicyAnybody => "trust.policy_anybody",
            Self::PolicyNobody => "trust.policy_nobody",
            Self::FollowedByUs => "trust.followed",
            Self::NotFollowed => "trust.not_followed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateDecision {
    pub verdict: Verdict,
    pub reason: GateReason,
}

impl GateDecision {
    const fn allow(reason: GateReason) -> Self {
        Self {
            verdict: Verdict::Allow,
            reason,
        }
    }

    const fn deny(reason: GateReason) -> Self {
        Self {
            verdict: Verdict::Deny,
            reason,
        }
    }

    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self.verdict, Verdict::Allow)
    }

    /// Reason to send back to the requester, `None` when allowed.
    #[must_use]
    pub const fn deny_reason(&self) -> Option<DenyReason> {
        match (self.verdict, self.reason) {
            (Verdict::Allow, _) => None,
            (Verdict::Deny, GateReason::PolicyNobody) => Some(DenyReason::PolicyNobody),
            (Verdict::Deny, _) => Some(DenyReason::NotFollowed),
        }
    }
}

/// Decides whether a remote host may duplicate this instance's videos.
///
/// The decision depends only on the configured policy and the current follow
/// graph. Nothing is cached, so a follow change applies to the next request.
pub struct TrustPolicyGate {
    policy: AcceptancePolicy,
    local_host: Host,
    follows: Arc<dyn FollowGraph>,
}

impl std::fmt::Debug for TrustPolicyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustPolicyGate")
            .field("policy", &self.policy)
            .field("local_host", &self.local_host)
            .finish_non_exhaustive()
    }
}

impl TrustPolicyGate {
    #[must_use]
    pub fn new(policy: AcceptancePolicy, local_host: Host, follows: Arc<dyn FollowGraph>) -> Self {
        Self {
            policy,
            local_host,
            follows,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> AcceptancePolicy {
        self.policy
    }

    /// Evaluate a request. Every decision is logged for audit.
    pub async fn evaluate(&self, request: &DuplicationRequest) -> GateDecision {
        let decision = match self.policy {
            AcceptancePolicy::Nobody => GateDecision::deny(GateReason::PolicyNobody),
            AcceptancePolicy::Anybody => GateDecision::allow(GateReason::PolicyAnybody),
            AcceptancePolicy::Followings => {
                if self
                    .follows
                    .is_following(&self.local_host, &request.requesting_host)
                    .await
                {
                    GateDecision::allow(GateReason::FollowedByUs)
                } else {
                    GateDecision::deny(GateReason::NotFollowed)
                }
            }
        };

        tracing::info!(
            requesting_host = %request.requesting_host,
            artifact = %request.key,
            policy = %self.policy,
            verdict = ?decision.verdict,
            reason = decision.reason.as_str(),
            "Evaluated duplication request"
        );
        decision
    }
}

#[cfg(test)]
mod tests {
    use url::Url;
    use vrd_core::{ArtifactKey, FollowFact, VideoId};

    use super::*;
    use crate::collaborators::StaticFollowGraph;

    fn host(name: &str) -> Host {
        Host::parse(name).unwrap()
    }

    fn request_from(requester: &str) -> DuplicationRequest {
        DuplicationRequest {
            requesting_host: host(requester),
            key: ArtifactKey::file(VideoId::new(1), 720),
            file_url: Url::parse("https://peer.test/static/redundancy/1-720.mp4").unwrap(),
            size_bytes: 10,
            strategy: None,
            expires_on: None,
        }
    }

    fn gate(policy: AcceptancePolicy, graph: Arc<StaticFollowGraph>) -> TrustPolicyGate {
        TrustPolicyGate::new(policy, host("origin.test"), graph)
    }

    #[tokio::test]
    async fn nobody_always_denies() {
        let graph = Arc::new(StaticFollowGraph::new([FollowFact::accepted(
            host("origin.test"),
            host("peer.test"),
        )]));
        let decision = gate(AcceptancePolicy::Nobody, graph)
            .evaluate(&request_from("peer.test"))
            .await;
        assert!(!decision.is_allowed());
        assert_eq!(decision.deny_reason(), Some(DenyReason::PolicyNobody));
    }

    #[tokio::test]
    async fn anybody_always_allows() {
        let decision = gate(AcceptancePolicy::Anybody, Arc::default())
            .evaluate(&request_from("stranger.test"))
            .await;
        assert!(decision.is_allowed());
        assert_eq!(decision.deny_reason(), None);
    }

    #[tokio::test]
    async fn followings_requires_accepted_follow_of_requester() {
        let graph = Arc::new(StaticFollowGraph::default());
        let gate = gate(AcceptancePolicy::Followings, graph.clone());
        let request = request_from("peer.test");

        assert!(!gate.evaluate(&request).await.is_allowed());

        // The requester following us does not count.
        graph.upsert(FollowFact::accepted(host("peer.test"), host("origin.test")));
        assert!(!gate.evaluate(&request).await.is_allowed());

        graph.upsert(FollowFact::pending(host("origin.test"), host("peer.test")));
        assert!(!gate.evaluate(&request).await.is_allowed());

        graph.upsert(FollowFact::accepted(host("origin.test"), host("peer.test")));
        let decision = gate.evaluate(&request).await;
        assert!(decision.is_allowed());
        assert_eq!(decision.reason, GateReason::FollowedByUs);

        graph.remove(&host("origin.test"), &host("peer.test"));
        assert_eq!(
            gate.evaluate(&request).await.deny_reason(),
            Some(DenyReason::NotFollowed)
        );
    }

    #[tokio::test]
    async fn decisions_are_deterministic_for_a_fixed_graph() {
        let graph = Arc::new(StaticFollowGraph::new([FollowFact::accepted(
            host("origin.test"),
            host("peer.test"),
        )]));
        for policy in [
            AcceptancePolicy::Nobody,
            AcceptancePolicy::Followings,
            AcceptancePolicy::Anybody,
        ] {
            let gate = gate(policy, graph.clone());
            for requester in ["peer.test", "stranger.test"] {
                let request = request_from(requester);
                let first = gate.evaluate(&request).await;
                for _ in 0..5 {
                    assert_eq!(gate.evaluate(&request).await, first);
                }
            }
        }
    }
}
