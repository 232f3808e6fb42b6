use chrono::Utc;
use tracing::info;

use crate::{
    classifier::classify,
    config::AppConfig,
    history::{HistoryManager, RunDelta, StoreError},
    metrics::PrometheusClient,
    models::ClassificationResult,
    peers::{ConsensusChecker, PeerDirectory, PeerProbe},
};

/// Everything one invocation produced: the per-deployment results and the
/// new/resolved delta against the previous run.
#[derive(Debug)]
pub struct MonitorOutcome {
    pub results: Vec<ClassificationResult>,
    pub delta: RunDelta,
}

/// One full monitoring pass: fetch allocations and telemetry, classify each
/// deployment in turn, then diff against history. Collaborator failures
/// degrade to data absence; only persisting history can fail the pass.
pub async fn run_once<P: PeerProbe>(
    config: &AppConfig,
    prometheus: &PrometheusClient,
    directory: &dyn PeerDirectory,
    allocations: Vec<crate::models::Allocation>,
    checker: &mut ConsensusChecker<P>,
    history: &mut HistoryManager,
) -> Result<MonitorOutcome, StoreError> {
    let metrics = prometheus.deployment_metrics().await;
    let chain_heads = prometheus.chain_heads().await;
    info!(
        deployments = metrics.len(),
        networks = chain_heads.len(),
        "collected metrics snapshot"
    );

    let now = Utc::now();
    let mut results = Vec::with_capacity(allocations.len());
    for allocation in &allocations {
        let result = classify(
            allocation,
            &metrics,
            &chain_heads,
            config,
            directory,
            checker,
            now,
        )
        .await;
        results.push(result);
    }

    let delta = history.record_run(&results)?;
    info!(
        total = results.len(),
        new = delta.new.len(),
        resolved = delta.resolved.len(),
        "run recorded"
    );

    Ok(MonitorOutcome { results, delta })
}
