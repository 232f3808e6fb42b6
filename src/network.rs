use std::{collections::HashSet, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::{
    models::Allocation,
    peers::{PeerDirectory, PeerOperator},
};

const ALLOCATION_PAGE_SIZE: usize = 1000;

/// Client for The Graph network subgraph: who allocates on what, and which
/// other operators serve a given deployment.
#[derive(Debug, Clone)]
pub struct NetworkSubgraphClient {
    client: Client,
    url: String,
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("graphql response carried no data")]
    NoData,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct AllocationsData {
    #[serde(default)]
    allocations: Vec<RawAllocation>,
}

#[derive(Debug, Deserialize)]
struct RawAllocation {
    #[serde(rename = "allocatedTokens", default)]
    allocated_tokens: String,
    #[serde(rename = "createdAt", default)]
    created_at: i64,
    #[serde(rename = "subgraphDeployment")]
    subgraph_deployment: Option<RawDeployment>,
}

#[derive(Debug, Deserialize)]
struct RawDeployment {
    #[serde(rename = "ipfsHash", default)]
    ipfs_hash: String,
    manifest: Option<RawManifest>,
    #[serde(default)]
    versions: Vec<RawVersion>,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    network: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawVersion {
    subgraph: Option<RawSubgraph>,
}

#[derive(Debug, Deserialize)]
struct RawSubgraph {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PeerAllocationsData {
    #[serde(default)]
    allocations: Vec<RawPeerAllocation>,
}

#[derive(Debug, Deserialize)]
struct RawPeerAllocation {
    indexer: Option<RawIndexer>,
}

#[derive(Debug, Deserialize)]
struct RawIndexer {
    id: Option<String>,
    url: Option<String>,
}

const ALLOCATIONS_QUERY: &str = "
query($indexer: String!, $skip: Int!, $first: Int!) {
    allocations(
        where: {indexer: $indexer, status: Active}
        first: $first
        skip: $skip
    ) {
        id
        allocatedTokens
        createdAt
        subgraphDeployment {
            ipfsHash
            manifest {
                network
            }
            versions(first: 1, orderBy: createdAt, orderDirection: desc) {
                subgraph {
                    id
                }
            }
        }
    }
}
";

const OTHER_INDEXERS_QUERY: &str = "
query($deployment: String!, $excludeIndexer: String!) {
    allocations(
        where: {
            subgraphDeployment_: {ipfsHash: $deployment}
            status: Active
            indexer_not: $excludeIndexer
        }
        first: 100
    ) {
        indexer {
            id
            url
        }
    }
}
";

impl NetworkSubgraphClient {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            url: url.to_owned(),
        }
    }

    async fn query<T: for<'de> Deserialize<'de>>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, NetworkError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?
            .error_for_status()?
            .json::<GraphQlResponse<T>>()
            .await?;

        response.data.ok_or(NetworkError::NoData)
    }

    /// All active allocations for an indexer, paged. A transport failure
    /// mid-pagination keeps what was fetched so far; the run degrades to a
    /// partial (possibly empty) allocation set rather than aborting.
    pub async fn indexer_allocations(&self, indexer_id: &str) -> Vec<Allocation> {
        let mut allocations = Vec::new();
        let mut skip = 0usize;

        loop {
            let variables = json!({
                "indexer": indexer_id.to_lowercase(),
                "skip": skip,
                "first": ALLOCATION_PAGE_SIZE,
            });
            let batch = match self.query::<AllocationsData>(ALLOCATIONS_QUERY, variables).await {
                Ok(data) => data.allocations,
                Err(error) => {
                    warn!(indexer_id, skip, error = %error, "allocation query failed");
                    break;
                }
            };

            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();
            allocations.extend(batch.into_iter().map(Allocation::from));
            if batch_len < ALLOCATION_PAGE_SIZE {
                break;
            }
            skip += ALLOCATION_PAGE_SIZE;
        }

        allocations
    }
}

impl From<RawAllocation> for Allocation {
    fn from(raw: RawAllocation) -> Self {
        let deployment = raw.subgraph_deployment;
        let (ipfs_hash, network, subgraph_id) = match deployment {
            Some(deployment) => (
                deployment.ipfs_hash,
                deployment.manifest.and_then(|manifest| manifest.network),
                deployment
                    .versions
                    .into_iter()
                    .next()
                    .and_then(|version| version.subgraph)
                    .and_then(|subgraph| subgraph.id),
            ),
            None => (String::new(), None, None),
        };

        Self {
            ipfs_hash,
            subgraph_id,
            network,
            allocated_tokens: raw.allocated_tokens.parse::<u128>().unwrap_or(0),
            created_at: (raw.created_at > 0).then_some(raw.created_at),
        }
    }
}

#[async_trait]
impl PeerDirectory for NetworkSubgraphClient {
    async fn peers_for(&self, deployment: &str, exclude_indexer: &str) -> Vec<PeerOperator> {
        let variables = json!({
            "deployment": deployment,
            "excludeIndexer": exclude_indexer.to_lowercase(),
        });
        let allocations = match self
            .query::<PeerAllocationsData>(OTHER_INDEXERS_QUERY, variables)
            .await
        {
            Ok(data) => data.allocations,
            Err(error) => {
                warn!(deployment, error = %error, "peer directory query failed");
                return Vec::new();
            }
        };

        // Several allocations may share an indexer; dedupe by id.
        let mut seen = HashSet::new();
        let mut peers = Vec::new();
        for allocation in allocations {
            let Some(indexer) = allocation.indexer else {
                continue;
            };
            let Some(id) = indexer.id else { continue };
            if seen.insert(id.clone()) {
                peers.push(PeerOperator {
                    id,
                    url: indexer.url,
                });
            }
        }
        peers
    }
}
