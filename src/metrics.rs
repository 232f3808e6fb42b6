use std::{collections::HashMap, time::Duration};

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::models::{DeploymentMetrics, DeploymentStatus};

/// Client for the graph-node Prometheus endpoint. All lookups are batched:
/// one query returns the samples for every deployment or network at once.
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("prometheus returned non-success status: {0}")]
    Status(String),
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    data: QueryData,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<Sample>,
}

#[derive(Debug, Deserialize)]
struct Sample {
    #[serde(default)]
    metric: HashMap<String, String>,
    /// Instant vector value: `[unix_time, "<value>"]`.
    value: (f64, String),
}

impl Sample {
    fn label(&self, name: &str) -> Option<&str> {
        self.metric.get(name).map(String::as_str)
    }

    fn as_f64(&self) -> Option<f64> {
        self.value.1.parse::<f64>().ok()
    }

    fn as_u64(&self) -> Option<u64> {
        let value = self.as_f64()?;
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let truncated = value.trunc();
        if truncated > u64::MAX as f64 {
            return None;
        }
        Some(truncated as u64)
    }
}

impl PrometheusClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    async fn query(&self, promql: &str) -> Result<Vec<Sample>, MetricsError> {
        let url = format!("{}/api/v1/query", self.base_url);
        let response = self
            .client
            .get(url)
            .query(&[("query", promql)])
            .send()
            .await?
            .error_for_status()?
            .json::<QueryResponse>()
            .await?;

        if response.status != "success" {
            return Err(MetricsError::Status(response.status));
        }
        Ok(response.data.result)
    }

    /// One query that tolerates transport failure: a failed PromQL query
    /// yields no samples for that series, logged, never fatal.
    async fn query_degraded(&self, promql: &str) -> Vec<Sample> {
        match self.query(promql).await {
            Ok(samples) => samples,
            Err(error) => {
                warn!(promql, error = %error, "prometheus query failed");
                Vec::new()
            }
        }
    }

    /// Metrics for all deployments at once: processed head, status code,
    /// and a recent blocks/hour sample derived from the head rate.
    pub async fn deployment_metrics(&self) -> HashMap<String, DeploymentMetrics> {
        let mut metrics: HashMap<String, DeploymentMetrics> = HashMap::new();

        for sample in self.query_degraded("deployment_head").await {
            if let (Some(deployment), Some(head)) = (sample.label("deployment"), sample.as_u64()) {
                metrics.entry(deployment.to_owned()).or_default().head = Some(head);
            }
        }

        for sample in self.query_degraded("deployment_status").await {
            if let (Some(deployment), Some(code)) = (sample.label("deployment"), sample.as_u64()) {
                metrics.entry(deployment.to_owned()).or_default().status =
                    Some(DeploymentStatus::from_code(code));
            }
        }

        // Head-rate gives a better sync estimate than the processed-block
        // counter, but only for deployments we already have a head for.
        for sample in self
            .query_degraded("rate(deployment_head[10m]) * 3600")
            .await
        {
            if let (Some(deployment), Some(rate)) = (sample.label("deployment"), sample.as_f64()) {
                if let Some(entry) = metrics.get_mut(deployment) {
                    entry.blocks_per_hour = Some(rate);
                }
            }
        }

        metrics
    }

    /// Current chain head per network name.
    pub async fn chain_heads(&self) -> HashMap<String, u64> {
        let mut heads = HashMap::new();
        for sample in self.query_degraded("ethereum_chain_head_number").await {
            if let (Some(network), Some(head)) = (sample.label("network"), sample.as_u64()) {
                heads.insert(network.to_owned(), head);
            }
        }
        heads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_vector_samples_parse_numeric_values() {
        let raw = r#"{
            "status": "success",
            "data": {
                "result": [
                    {"metric": {"deployment": "QmA"}, "value": [1700000000.1, "12345"]},
                    {"metric": {"deployment": "QmB"}, "value": [1700000000.1, "not-a-number"]}
                ]
            }
        }"#;
        let response: Result<QueryResponse, _> = serde_json::from_str(raw);
        assert!(response.is_ok());
        let response = match response {
            Ok(response) => response,
            Err(_) => return,
        };

        assert_eq!(response.data.result.len(), 2);
        let first = response.data.result.first();
        assert!(first.is_some_and(|sample| sample.as_u64() == Some(12345)));
        assert!(first.is_some_and(|sample| sample.label("deployment") == Some("QmA")));
        let second = response.data.result.get(1);
        assert!(second.is_some_and(|sample| sample.as_u64().is_none()));
    }

    #[test]
    fn negative_and_non_finite_values_are_skipped() {
        let sample = Sample {
            metric: HashMap::new(),
            value: (0.0, "-5".to_owned()),
        };
        assert_eq!(sample.as_u64(), None);
        let nan = Sample {
            metric: HashMap::new(),
            value: (0.0, "NaN".to_owned()),
        };
        assert_eq!(nan.as_u64(), None);
    }
}
