use chrono::{DateTime, Utc};

use crate::{
    ack::AckManager,
    format::{format_blocks, format_duration, format_tokens},
    history::{HistoryManager, RunDelta},
    models::{ClassificationResult, FailureAttribution},
};

const RESOLVED_LIST_CAP: usize = 10;
const NEW_LIST_CAP: usize = 20;

/// Results bucketed for presentation. Failure buckets follow the peer
/// attribution; slow-sync outranks gap-growing when both issues are present.
#[derive(Debug, Default)]
pub struct ReportBuckets {
    pub healthy: Vec<ClassificationResult>,
    pub failed_our_issue: Vec<ClassificationResult>,
    pub failed_same_block: Vec<ClassificationResult>,
    pub failed_subgraph: Vec<ClassificationResult>,
    pub failed_unknown: Vec<ClassificationResult>,
    pub sync_too_slow: Vec<ClassificationResult>,
    pub gap_growing: Vec<ClassificationResult>,
    pub no_metrics: Vec<ClassificationResult>,
    pub acknowledged_count: usize,
}

impl ReportBuckets {
    pub fn total_issues(&self) -> usize {
        self.failed_our_issue.len()
            + self.failed_same_block.len()
            + self.failed_subgraph.len()
            + self.failed_unknown.len()
            + self.sync_too_slow.len()
            + self.gap_growing.len()
            + self.no_metrics.len()
    }
}

pub fn bucket_results(
    results: Vec<ClassificationResult>,
    acks: &mut AckManager,
    show_acknowledged: bool,
    now: DateTime<Utc>,
) -> ReportBuckets {
    let mut buckets = ReportBuckets::default();

    for result in results {
        if acks
            .is_acknowledged_at(&result.allocation.ipfs_hash, now)
            .is_some()
            && !show_acknowledged
        {
            buckets.acknowledged_count += 1;
            continue;
        }

        if result.is_healthy() {
            buckets.healthy.push(result);
        } else if result.has_no_metrics() && !result.has_error() {
            buckets.no_metrics.push(result);
        } else if let Some(attribution) = result.failure_attribution() {
            match attribution {
                FailureAttribution::OurIssue => buckets.failed_our_issue.push(result),
                FailureAttribution::SameBlock => buckets.failed_same_block.push(result),
                FailureAttribution::SubgraphIssue => buckets.failed_subgraph.push(result),
                FailureAttribution::Unknown => buckets.failed_unknown.push(result),
            }
        } else if result.has_sync_too_slow() {
            buckets.sync_too_slow.push(result);
        } else if result.has_gap_growing() {
            buckets.gap_growing.push(result);
        }
    }

    buckets
}

pub fn render(
    buckets: &ReportBuckets,
    delta: &RunDelta,
    history: &HistoryManager,
    acks: &mut AckManager,
    now: DateTime<Utc>,
) {
    println!();
    println!("Subgraph Health Report");
    println!("{}", "=".repeat(70));

    println!("  Healthy: {}", buckets.healthy.len());
    let failed_total = buckets.failed_our_issue.len()
        + buckets.failed_same_block.len()
        + buckets.failed_subgraph.len()
        + buckets.failed_unknown.len();
    if failed_total > 0 {
        println!("  Indexing Failed: {failed_total}");
    }
    if !buckets.sync_too_slow.is_empty() {
        println!("  Sync Too Slow: {}", buckets.sync_too_slow.len());
    }
    if !buckets.gap_growing.is_empty() {
        println!("  Gap Growing: {}", buckets.gap_growing.len());
    }
    if !buckets.no_metrics.is_empty() {
        println!("  No Metrics: {}", buckets.no_metrics.len());
    }
    if buckets.acknowledged_count > 0 {
        println!("  (includes {} acknowledged)", buckets.acknowledged_count);
    }

    render_delta(delta);

    render_section(
        "INDEXING FAILED - OUR ISSUE",
        Some("(Other indexers are healthy - problem is on our side)"),
        &buckets.failed_our_issue,
        history,
        acks,
        now,
    );
    render_section(
        "INDEXING FAILED - SUBGRAPH ISSUE (same block)",
        Some("(All indexers failing at the same block - definite subgraph bug)"),
        &buckets.failed_same_block,
        history,
        acks,
        now,
    );
    render_section(
        "INDEXING FAILED - SUBGRAPH ISSUE",
        Some("(All indexers failing - likely a subgraph problem)"),
        &buckets.failed_subgraph,
        history,
        acks,
        now,
    );
    render_section(
        "INDEXING FAILED - UNKNOWN",
        Some("(Could not check other indexers)"),
        &buckets.failed_unknown,
        history,
        acks,
        now,
    );
    render_section("SYNC TOO SLOW", None, &buckets.sync_too_slow, history, acks, now);
    render_section("GAP GROWING", None, &buckets.gap_growing, history, acks, now);
    render_section("NO METRICS", None, &buckets.no_metrics, history, acks, now);
}

fn render_delta(delta: &RunDelta) {
    if delta.new.is_empty() && delta.resolved.is_empty() {
        return;
    }

    println!();
    println!("Changes since last run:");
    println!("{}", "-".repeat(70));

    if !delta.resolved.is_empty() {
        println!("  {} resolved:", delta.resolved.len());
        for change in delta.resolved.iter().take(RESOLVED_LIST_CAP) {
            let duration = change.duration.as_deref().unwrap_or("?");
            println!("    {} (was failing for {duration})", change.ipfs_hash);
        }
        if delta.resolved.len() > RESOLVED_LIST_CAP {
            println!("    ... and {} more", delta.resolved.len() - RESOLVED_LIST_CAP);
        }
    }

    if !delta.new.is_empty() {
        println!("  {} new issues:", delta.new.len());
        for change in delta.new.iter().take(NEW_LIST_CAP) {
            println!("    {} ({})", change.ipfs_hash, change.issue_type.label());
        }
        if delta.new.len() > NEW_LIST_CAP {
            println!("    ... and {} more", delta.new.len() - NEW_LIST_CAP);
        }
    }
    println!();
}

fn render_section(
    title: &str,
    note: Option<&str>,
    results: &[ClassificationResult],
    history: &HistoryManager,
    acks: &mut AckManager,
    now: DateTime<Utc>,
) {
    if results.is_empty() {
        return;
    }

    println!();
    println!("{title} ({})", results.len());
    if let Some(note) = note {
        println!("  {note}");
    }
    println!("{}", "-".repeat(70));
    for result in results {
        render_item(result, history, acks, now);
    }
}

fn render_item(
    result: &ClassificationResult,
    history: &HistoryManager,
    acks: &mut AckManager,
    now: DateTime<Utc>,
) {
    let hash = &result.allocation.ipfs_hash;

    let duration = history
        .issue_duration_at(hash, now)
        .map(|duration| format!(" [{duration}]"))
        .unwrap_or_default();

    let ack_tag = acks
        .is_acknowledged_at(hash, now)
        .map(|ack| {
            let category = format!("{:?}", ack.category).to_lowercase();
            if ack.reason.is_empty() {
                format!(" [{category}]")
            } else {
                format!(" [{category}] \"{}\"", ack.reason)
            }
        })
        .unwrap_or_default();

    println!("  {hash}{duration}{ack_tag}");

    let mut details = vec![
        result
            .allocation
            .network
            .clone()
            .unwrap_or_else(|| "unknown".to_owned()),
        format_tokens(result.allocation.allocated_tokens),
    ];

    if let Some(gap) = result.gap {
        details.push(format!("{} behind", format_blocks(gap)));
    }
    if let Some(rate) = result.blocks_per_hour {
        if rate.is_finite() && rate >= 0.0 {
            details.push(format!("{}/h", format_blocks(rate.trunc() as u64)));
        }
    }
    if let (Some(sync), Some(remaining)) =
        (result.estimated_sync_secs, result.allocation_remaining_secs)
    {
        details.push(format!(
            "sync:{} remain:{}",
            format_duration(sync),
            format_duration(remaining)
        ));
    }
    if let Some(consensus) = result.peers {
        details.push(format!(
            "others: {} ok, {} failed",
            consensus.healthy, consensus.failed
        ));
    }
    if result.same_block_failure {
        if let Some(common_block) = result.peers.and_then(|peers| peers.common_fail_block) {
            details.push(format!("@ block {common_block}"));
        }
    }

    println!("    {}", details.join(" | "));
}
