use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{
    config::AppConfig,
    models::{
        Allocation, ClassificationResult, DeploymentMetrics, DeploymentStatus, Issue, Warning,
    },
    peers::{ConsensusChecker, PeerDirectory, PeerProbe},
};

/// A deployment this far behind the chain head is considered to have a
/// significant gap.
const SIGNIFICANT_GAP: u64 = 1000;

/// Below this throughput a deployment with a significant gap counts as stuck.
const STUCK_BLOCKS_PER_HOUR: f64 = 10.0;

/// Our head must be within this many blocks of the peers' common fail block
/// to call it the same failure.
const SAME_BLOCK_SPAN: u64 = 100;

/// Evaluate one deployment. Checks run in a fixed order and the failure
/// check is terminal; missing data is a valid state and never an error.
/// Peers are consulted only on the failure path, to attribute blame.
pub async fn classify<P: PeerProbe>(
    allocation: &Allocation,
    metrics: &HashMap<String, DeploymentMetrics>,
    chain_heads: &HashMap<String, u64>,
    config: &AppConfig,
    directory: &dyn PeerDirectory,
    checker: &mut ConsensusChecker<P>,
    now: DateTime<Utc>,
) -> ClassificationResult {
    let mut result = ClassificationResult::new(allocation.clone());

    let Some(metrics) = metrics.get(&allocation.ipfs_hash).copied() else {
        result.warnings.push(Warning::NoMetrics);
        return result;
    };

    let head = metrics.head.filter(|&head| head > 0);
    let network = allocation.network.as_deref();
    let chain_head = network.and_then(|name| chain_heads.get(name)).copied();
    let expected = config.expected_blocks_per_hour(network);
    let blocks_per_hour = metrics.blocks_per_hour;

    let mut gap = 0u64;
    if let (Some(head), Some(chain_head)) = (head, chain_head) {
        if chain_head > head {
            gap = chain_head - head;
            result.gap = Some(gap);
            result.chain_head = Some(chain_head);
        }
    }

    // Failure check: reported failed, or stuck (no throughput, large gap).
    let is_stuck =
        blocks_per_hour.is_some_and(|rate| rate < STUCK_BLOCKS_PER_HOUR) && gap > SIGNIFICANT_GAP;
    let is_failed = metrics.status == Some(DeploymentStatus::Failed) || is_stuck;

    if is_failed {
        let stuck = metrics.status != Some(DeploymentStatus::Failed);
        result.issues.push(Issue::Error { stuck });
        result.blocks_per_hour = blocks_per_hour;

        let peers = directory
            .peers_for(&allocation.ipfs_hash, &config.indexer_id)
            .await;
        if !peers.is_empty() {
            let consensus = checker
                .check(&allocation.ipfs_hash, head.unwrap_or(0), &peers)
                .await;
            result.peers = Some(consensus);
            if let (Some(common_block), Some(head)) = (consensus.common_fail_block, head) {
                if head.abs_diff(common_block) < SAME_BLOCK_SPAN {
                    result.same_block_failure = true;
                }
            }
        }
        return result;
    }

    // Gap-growing check: a significant gap and not catching up fast enough.
    if head.is_some() && chain_head.is_some() && gap > SIGNIFICANT_GAP {
        result.blocks_per_hour = blocks_per_hour;
        if let Some(rate) = blocks_per_hour {
            if rate < expected * 0.8 {
                result.issues.push(Issue::GapGrowing {
                    gap,
                    blocks_per_hour: rate,
                    expected,
                });
            }
        }
    }

    // Sync-too-slow check: would the remaining sync outlast the allocation?
    // This can fire alongside gap_growing; the two are not exclusive.
    if let (Some(_), Some(created_at)) = (head, allocation.created_at) {
        if gap > 0 {
            let allocation_end = created_at + config.allocation_max_days * 86400;
            let remaining_secs = (allocation_end - now.timestamp()) as f64;
            result.allocation_remaining_secs = Some(remaining_secs);

            if let Some(rate) = blocks_per_hour {
                if rate > 0.0 {
                    let estimated_secs = gap as f64 / rate * 3600.0;
                    result.estimated_sync_secs = Some(estimated_secs);
                    result.blocks_per_hour = Some(rate);

                    if estimated_secs > remaining_secs && remaining_secs > 0.0 {
                        result.issues.push(Issue::SyncTooSlow {
                            estimated_secs,
                            remaining_secs,
                        });
                    }
                }
            }
        }
    }

    result
}
