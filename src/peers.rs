use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{cache::TtlCache, models::PeerConsensus};

/// Failed peers clustering within this many blocks count as failing at a
/// common block, which points at a deterministic subgraph bug.
const COMMON_FAIL_SPAN: u64 = 100;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Another operator with an active allocation on the same deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerOperator {
    pub id: String,
    pub url: Option<String>,
}

/// Directory of peer operators for a deployment, excluding ourselves.
/// Transport failures degrade to an empty list at the implementation.
#[async_trait]
pub trait PeerDirectory {
    async fn peers_for(&self, deployment: &str, exclude_indexer: &str) -> Vec<PeerOperator>;
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("peer returned no status for the deployment")]
    NoStatus,
}

/// Raw indexing status reported by a peer's `/status` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReply {
    pub health: PeerHealth,
    pub latest_block: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerHealth {
    Healthy,
    Unhealthy,
    Failed,
}

/// Probes one peer's status endpoint for one deployment.
#[async_trait]
pub trait PeerProbe {
    async fn probe(&self, endpoint: &str, deployment: &str) -> Result<ProbeReply, ProbeError>;
}

/// Cached standing of one peer for one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Standing {
    Healthy,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PeerObservation {
    standing: Standing,
    #[serde(default)]
    latest_block: u64,
}

pub struct HttpPeerProbe {
    client: reqwest::Client,
}

const STATUS_QUERY: &str = "
query($deployment: String!) {
    indexingStatuses(subgraphs: [$deployment]) {
        synced
        health
        fatalError { message block { number } }
        chains { latestBlock { number } chainHeadBlock { number } }
    }
}
";

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    data: Option<StatusData>,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    #[serde(rename = "indexingStatuses", default)]
    indexing_statuses: Vec<IndexingStatus>,
}

#[derive(Debug, Deserialize)]
struct IndexingStatus {
    health: PeerHealth,
    #[serde(default)]
    chains: Vec<ChainStatus>,
}

#[derive(Debug, Deserialize)]
struct ChainStatus {
    #[serde(rename = "latestBlock")]
    latest_block: Option<BlockPointer>,
}

#[derive(Debug, Deserialize)]
struct BlockPointer {
    number: serde_json::Value,
}

impl BlockPointer {
    // Indexer status endpoints return block numbers as either JSON numbers
    // or strings depending on the implementation.
    fn as_u64(&self) -> u64 {
        match &self.number {
            serde_json::Value::Number(number) => number.as_u64().unwrap_or(0),
            serde_json::Value::String(raw) => raw.parse::<u64>().unwrap_or(0),
            _ => 0,
        }
    }
}

impl Default for HttpPeerProbe {
    fn default() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(PROBE_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl PeerProbe for HttpPeerProbe {
    async fn probe(&self, endpoint: &str, deployment: &str) -> Result<ProbeReply, ProbeError> {
        let status_url = format!("{endpoint}/status");
        let response = self
            .client
            .post(status_url)
            .json(&serde_json::json!({
                "query": STATUS_QUERY,
                "variables": { "deployment": deployment },
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<StatusResponse>()
            .await?;

        let status = response
            .data
            .and_then(|data| data.indexing_statuses.into_iter().next())
            .ok_or(ProbeError::NoStatus)?;

        let latest_block = status
            .chains
            .first()
            .and_then(|chain| chain.latest_block.as_ref())
            .map(BlockPointer::as_u64)
            .unwrap_or(0);

        Ok(ProbeReply {
            health: status.health,
            latest_block,
        })
    }
}

/// Determines how many peers serving a deployment are healthy-and-caught-up,
/// how many have failed, and whether the failures cluster at a common block.
/// Every probe outcome (including unknown) is cached to bound repeat cost.
pub struct ConsensusChecker<P> {
    probe: P,
    cache: TtlCache,
}

impl<P: PeerProbe> ConsensusChecker<P> {
    pub fn new(probe: P, cache: TtlCache) -> Self {
        Self { probe, cache }
    }

    pub async fn check(
        &mut self,
        deployment: &str,
        our_head: u64,
        peers: &[PeerOperator],
    ) -> PeerConsensus {
        let mut healthy = 0u32;
        let mut failed = 0u32;
        let mut fail_blocks = Vec::new();

        for peer in peers {
            let Some(endpoint) = normalize_endpoint(peer.url.as_deref()) else {
                continue;
            };

            let cache_key = format!("status_{}_{deployment}", peer.id);
            let observation = match self.cache.get::<PeerObservation>(&cache_key) {
                Some(cached) => cached,
                None => {
                    let observation = self.observe(&endpoint, deployment, our_head, &peer.id).await;
                    self.cache.set(&cache_key, &observation);
                    observation
                }
            };

            match observation.standing {
                Standing::Failed => {
                    failed += 1;
                    if observation.latest_block > 0 {
                        fail_blocks.push(observation.latest_block);
                    }
                }
                // Cached healthy entries are re-checked against the current
                // head; a peer behind us counts as neither healthy nor failed.
                Standing::Healthy if observation.latest_block >= our_head => healthy += 1,
                Standing::Healthy | Standing::Unknown => {}
            }
        }

        PeerConsensus {
            healthy,
            failed,
            common_fail_block: common_fail_block(&fail_blocks),
        }
    }

    async fn observe(
        &self,
        endpoint: &str,
        deployment: &str,
        our_head: u64,
        peer_id: &str,
    ) -> PeerObservation {
        match self.probe.probe(endpoint, deployment).await {
            Ok(reply) => {
                let standing = match reply.health {
                    PeerHealth::Failed => Standing::Failed,
                    PeerHealth::Healthy if reply.latest_block >= our_head => Standing::Healthy,
                    PeerHealth::Healthy | PeerHealth::Unhealthy => Standing::Unknown,
                };
                PeerObservation {
                    standing,
                    latest_block: reply.latest_block,
                }
            }
            Err(error) => {
                // A single unreachable peer never aborts the batch.
                debug!(peer_id, deployment, error = %error, "peer probe failed");
                PeerObservation {
                    standing: Standing::Unknown,
                    latest_block: 0,
                }
            }
        }
    }
}

fn normalize_endpoint(url: Option<&str>) -> Option<String> {
    let url = url?.trim();
    if url.is_empty() {
        return None;
    }
    let with_scheme = if url.starts_with("http") {
        url.to_owned()
    } else {
        format!("https://{url}")
    };
    Some(with_scheme.trim_end_matches('/').to_owned())
}

fn common_fail_block(fail_blocks: &[u64]) -> Option<u64> {
    let min = fail_blocks.iter().min().copied()?;
    let max = fail_blocks.iter().max().copied()?;
    if max - min < COMMON_FAIL_SPAN {
        Some(min)
    } else {
        debug!(min, max, "failed peers do not cluster at a common block");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicU32, Ordering},
    };

    struct ScriptedProbe {
        replies: HashMap<String, Result<ProbeReply, ()>>,
        calls: AtomicU32,
    }

    impl ScriptedProbe {
        fn new(replies: Vec<(&str, Result<ProbeReply, ()>)>) -> Self {
            Self {
                replies: replies
                    .into_iter()
                    .map(|(endpoint, reply)| (endpoint.to_owned(), reply))
                    .collect(),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl PeerProbe for ScriptedProbe {
        async fn probe(&self, endpoint: &str, _deployment: &str) -> Result<ProbeReply, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.replies.get(endpoint) {
                Some(Ok(reply)) => Ok(reply.clone()),
                _ => Err(ProbeError::NoStatus),
            }
        }
    }

    fn peer(id: &str, url: &str) -> PeerOperator {
        PeerOperator {
            id: id.to_owned(),
            url: Some(url.to_owned()),
        }
    }

    fn cache() -> Option<(tempfile::TempDir, TtlCache)> {
        let dir = tempfile::tempdir().ok()?;
        let cache = TtlCache::new(dir.path().to_path_buf(), Duration::from_secs(300));
        Some((dir, cache))
    }

    fn reply(health: PeerHealth, latest_block: u64) -> Result<ProbeReply, ()> {
        Ok(ProbeReply {
            health,
            latest_block,
        })
    }

    #[tokio::test]
    async fn clustered_failures_report_a_common_block() {
        let Some((_dir, cache)) = cache() else { return };
        let probe = ScriptedProbe::new(vec![
            ("https://a.example", reply(PeerHealth::Failed, 1000)),
            ("https://b.example", reply(PeerHealth::Failed, 1050)),
            ("https://c.example", reply(PeerHealth::Failed, 1099)),
        ]);
        let mut checker = ConsensusChecker::new(probe, cache);

        let consensus = checker
            .check(
                "QmDep",
                1000,
                &[
                    peer("0xa", "a.example"),
                    peer("0xb", "b.example"),
                    peer("0xc", "c.example"),
                ],
            )
            .await;

        assert_eq!(consensus.failed, 3);
        assert_eq!(consensus.healthy, 0);
        assert_eq!(consensus.common_fail_block, Some(1000));
    }

    #[tokio::test]
    async fn scattered_failures_have_no_common_block() {
        let Some((_dir, cache)) = cache() else { return };
        let probe = ScriptedProbe::new(vec![
            ("https://a.example", reply(PeerHealth::Failed, 1000)),
            ("https://b.example", reply(PeerHealth::Failed, 1200)),
        ]);
        let mut checker = ConsensusChecker::new(probe, cache);

        let consensus = checker
            .check("QmDep", 1000, &[peer("0xa", "a.example"), peer("0xb", "b.example")])
            .await;

        assert_eq!(consensus.failed, 2);
        assert_eq!(consensus.common_fail_block, None);
    }

    #[tokio::test]
    async fn healthy_peers_count_only_when_caught_up() {
        let Some((_dir, cache)) = cache() else { return };
        let probe = ScriptedProbe::new(vec![
            ("https://ahead.example", reply(PeerHealth::Healthy, 5000)),
            ("https://behind.example", reply(PeerHealth::Healthy, 10)),
        ]);
        let mut checker = ConsensusChecker::new(probe, cache);

        let consensus = checker
            .check(
                "QmDep",
                4000,
                &[peer("0xahead", "ahead.example"), peer("0xbehind", "behind.example")],
            )
            .await;

        assert_eq!(consensus.healthy, 1);
        assert_eq!(consensus.failed, 0);
    }

    #[tokio::test]
    async fn unreachable_peers_degrade_to_unknown() {
        let Some((_dir, cache)) = cache() else { return };
        let probe = ScriptedProbe::new(vec![("https://down.example", Err(()))]);
        let mut checker = ConsensusChecker::new(probe, cache);

        let consensus = checker.check("QmDep", 1000, &[peer("0xdown", "down.example")]).await;

        assert_eq!(consensus.healthy, 0);
        assert_eq!(consensus.failed, 0);
        assert_eq!(consensus.common_fail_block, None);
    }

    #[tokio::test]
    async fn repeated_checks_within_ttl_hit_the_cache() {
        let Some((_dir, cache)) = cache() else { return };
        let probe = ScriptedProbe::new(vec![("https://a.example", reply(PeerHealth::Failed, 1000))]);
        let mut checker = ConsensusChecker::new(probe, cache);
        let peers = [peer("0xa", "a.example")];

        let first = checker.check("QmDep", 1000, &peers).await;
        let second = checker.check("QmDep", 1000, &peers).await;

        assert_eq!(first, second);
        assert_eq!(checker.probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn peers_without_urls_are_skipped() {
        let Some((_dir, cache)) = cache() else { return };
        let probe = ScriptedProbe::new(Vec::new());
        let mut checker = ConsensusChecker::new(probe, cache);

        let consensus = checker
            .check(
                "QmDep",
                1000,
                &[PeerOperator {
                    id: "0xnourl".to_owned(),
                    url: None,
                }],
            )
            .await;

        assert_eq!(consensus, PeerConsensus::default());
        assert_eq!(checker.probe.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn endpoint_normalization_adds_scheme_and_strips_slash() {
        assert_eq!(
            normalize_endpoint(Some("indexer.example/")),
            Some("https://indexer.example".to_owned())
        );
        assert_eq!(
            normalize_endpoint(Some("http://indexer.example")),
            Some("http://indexer.example".to_owned())
        );
        assert_eq!(normalize_endpoint(Some("")), None);
        assert_eq!(normalize_endpoint(None), None);
    }
}
