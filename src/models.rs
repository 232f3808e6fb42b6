use serde::{Deserialize, Serialize};

use crate::format::{format_blocks, format_duration};

/// One active allocation as reported by the network subgraph.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub ipfs_hash: String,
    /// Latest subgraph id behind the deployment, used for explorer links.
    pub subgraph_id: Option<String>,
    pub network: Option<String>,
    /// Allocated stake in wei (1e18 = 1 GRT).
    pub allocated_tokens: u128,
    /// Allocation creation time, unix seconds.
    pub created_at: Option<i64>,
}

/// Coarse deployment status reported by graph-node metrics (codes 1-4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Unknown,
    Synced,
    Failed,
    Syncing,
}

impl DeploymentStatus {
    pub fn from_code(code: u64) -> Self {
        match code {
            2 => Self::Synced,
            3 => Self::Failed,
            4 => Self::Syncing,
            _ => Self::Unknown,
        }
    }
}

/// Metrics snapshot for a single deployment. Every field may be absent;
/// absence is a valid state, not an error.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeploymentMetrics {
    pub head: Option<u64>,
    pub status: Option<DeploymentStatus>,
    pub blocks_per_hour: Option<f64>,
}

/// A detected problem, carrying only the diagnostics relevant to its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Issue {
    /// Indexing failed outright, or is stuck (no throughput with a large gap).
    Error { stuck: bool },
    /// Behind the chain head and not catching up fast enough.
    GapGrowing {
        gap: u64,
        blocks_per_hour: f64,
        expected: f64,
    },
    /// The remaining sync would outlast the allocation's lifetime.
    SyncTooSlow {
        estimated_secs: f64,
        remaining_secs: f64,
    },
}

impl Issue {
    pub fn message(&self) -> String {
        match self {
            Self::Error { stuck: false } => "Indexing failed".to_owned(),
            Self::Error { stuck: true } => "Indexing stuck (0 blocks/hour)".to_owned(),
            Self::GapGrowing {
                gap,
                blocks_per_hour,
                expected,
            } => format!(
                "Gap growing: {} behind, {blocks_per_hour:.0}/h vs expected {expected:.0}/h",
                format_blocks(*gap)
            ),
            Self::SyncTooSlow {
                estimated_secs,
                remaining_secs,
            } => format!(
                "Sync time ({}) > allocation remaining ({})",
                format_duration(*estimated_secs),
                format_duration(*remaining_secs)
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Warning {
    NoMetrics,
}

impl Warning {
    pub fn message(&self) -> &'static str {
        match self {
            Self::NoMetrics => "No Prometheus metrics found",
        }
    }
}

/// Tally of other operators serving the same deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerConsensus {
    pub healthy: u32,
    pub failed: u32,
    /// Minimum failed-peer block when all failures cluster within 100 blocks.
    pub common_fail_block: Option<u64>,
}

/// Who is to blame for a failed deployment, judged from peer consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAttribution {
    /// At least one peer is healthy and caught up; the problem is local.
    OurIssue,
    /// Peers fail at the same block we do; deterministic subgraph bug.
    SameBlock,
    /// No peer is healthy either; likely a subgraph-level problem.
    SubgraphIssue,
    /// Peers unreachable or none exist.
    Unknown,
}

/// Outcome of evaluating one deployment. Diagnostic fields are populated
/// only by the checks that reached them.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub allocation: Allocation,
    pub issues: Vec<Issue>,
    pub warnings: Vec<Warning>,
    pub gap: Option<u64>,
    pub chain_head: Option<u64>,
    pub blocks_per_hour: Option<f64>,
    pub estimated_sync_secs: Option<f64>,
    pub allocation_remaining_secs: Option<f64>,
    /// Present only when peers were consulted (failure path, peers found).
    pub peers: Option<PeerConsensus>,
    pub same_block_failure: bool,
}

impl ClassificationResult {
    pub fn new(allocation: Allocation) -> Self {
        Self {
            allocation,
            issues: Vec::new(),
            warnings: Vec::new(),
            gap: None,
            chain_head: None,
            blocks_per_hour: None,
            estimated_sync_secs: None,
            allocation_remaining_secs: None,
            peers: None,
            same_block_failure: false,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty() && self.warnings.is_empty()
    }

    pub fn has_error(&self) -> bool {
        self.issues
            .iter()
            .any(|issue| matches!(issue, Issue::Error { .. }))
    }

    pub fn has_gap_growing(&self) -> bool {
        self.issues
            .iter()
            .any(|issue| matches!(issue, Issue::GapGrowing { .. }))
    }

    pub fn has_sync_too_slow(&self) -> bool {
        self.issues
            .iter()
            .any(|issue| matches!(issue, Issue::SyncTooSlow { .. }))
    }

    pub fn has_no_metrics(&self) -> bool {
        self.warnings.contains(&Warning::NoMetrics)
    }

    /// Attribution for a failed deployment; `None` when there is no error issue.
    pub fn failure_attribution(&self) -> Option<FailureAttribution> {
        if !self.has_error() {
            return None;
        }
        let attribution = match self.peers {
            Some(consensus) if consensus.healthy > 0 => FailureAttribution::OurIssue,
            _ if self.same_block_failure => FailureAttribution::SameBlock,
            Some(_) => FailureAttribution::SubgraphIssue,
            None => FailureAttribution::Unknown,
        };
        Some(attribution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with_error(peers: Option<PeerConsensus>, same_block: bool) -> ClassificationResult {
        let mut result = ClassificationResult::new(Allocation {
            ipfs_hash: "QmTest".to_owned(),
            subgraph_id: None,
            network: Some("mainnet".to_owned()),
            allocated_tokens: 0,
            created_at: None,
        });
        result.issues.push(Issue::Error { stuck: false });
        result.peers = peers;
        result.same_block_failure = same_block;
        result
    }

    #[test]
    fn attribution_prefers_our_issue_when_any_peer_is_healthy() {
        let result = result_with_error(
            Some(PeerConsensus {
                healthy: 1,
                failed: 3,
                common_fail_block: Some(1000),
            }),
            true,
        );
        assert_eq!(result.failure_attribution(), Some(FailureAttribution::OurIssue));
    }

    #[test]
    fn attribution_detects_same_block_failures() {
        let result = result_with_error(
            Some(PeerConsensus {
                healthy: 0,
                failed: 2,
                common_fail_block: Some(1000),
            }),
            true,
        );
        assert_eq!(result.failure_attribution(), Some(FailureAttribution::SameBlock));
    }

    #[test]
    fn attribution_is_unknown_without_peer_data() {
        let result = result_with_error(None, false);
        assert_eq!(result.failure_attribution(), Some(FailureAttribution::Unknown));
    }

    #[test]
    fn stuck_and_failed_errors_render_distinct_messages() {
        assert_eq!(Issue::Error { stuck: false }.message(), "Indexing failed");
        assert_eq!(
            Issue::Error { stuck: true }.message(),
            "Indexing stuck (0 blocks/hour)"
        );
    }

    #[test]
    fn gap_growing_message_includes_gap_and_rate() {
        let message = Issue::GapGrowing {
            gap: 2000,
            blocks_per_hour: 50.0,
            expected: 300.0,
        }
        .message();
        assert!(message.contains("2.0K"));
        assert!(message.contains("50/h"));
        assert!(message.contains("300/h"));
    }

    #[test]
    fn status_codes_follow_graph_node_mapping() {
        assert_eq!(DeploymentStatus::from_code(1), DeploymentStatus::Unknown);
        assert_eq!(DeploymentStatus::from_code(2), DeploymentStatus::Synced);
        assert_eq!(DeploymentStatus::from_code(3), DeploymentStatus::Failed);
        assert_eq!(DeploymentStatus::from_code(4), DeploymentStatus::Syncing);
        assert_eq!(DeploymentStatus::from_code(9), DeploymentStatus::Unknown);
    }
}
