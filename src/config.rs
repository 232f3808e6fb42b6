use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Runtime configuration, resolved from environment variables and an
/// optional JSON file at `<config_dir>/config.json`. File values win.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub prometheus_url: String,
    pub network_subgraph_url: String,
    pub indexer_id: String,
    pub allocation_max_days: i64,
    /// Expected indexing throughput per network, blocks per hour.
    pub chain_blocks_per_hour: HashMap<String, f64>,
    pub config_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("indexer_id not configured; run with --init or set INDEXER_ID")]
    MissingIndexerId,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

const DEFAULT_NETWORK_SUBGRAPH_URL: &str =
    "https://api.thegraph.com/subgraphs/name/graphprotocol/graph-network-arbitrum";

/// Fallback expected blocks/hour when a network has no table entry.
pub const DEFAULT_BLOCKS_PER_HOUR: f64 = 300.0;

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    prometheus_url: Option<String>,
    network_subgraph_url: Option<String>,
    indexer_id: Option<String>,
    // Legacy key accepted by earlier versions of the config file.
    my_indexer_id: Option<String>,
    allocation_max_days: Option<i64>,
    chain_blocks_per_hour: Option<HashMap<String, f64>>,
}

impl AppConfig {
    /// Resolve config from env defaults overlaid with the config file.
    /// Malformed config files degrade to env defaults with a warning.
    pub fn load(config_dir: PathBuf) -> Self {
        let mut config = Self {
            prometheus_url: env::var("PROMETHEUS_URL")
                .unwrap_or_else(|_| "http://localhost:9090".to_owned()),
            network_subgraph_url: env::var("NETWORK_SUBGRAPH_URL")
                .unwrap_or_else(|_| DEFAULT_NETWORK_SUBGRAPH_URL.to_owned()),
            indexer_id: env::var("INDEXER_ID").unwrap_or_default(),
            allocation_max_days: env::var("ALLOCATION_MAX_DAYS")
                .ok()
                .and_then(|raw| raw.parse::<i64>().ok())
                .unwrap_or(28),
            chain_blocks_per_hour: default_chain_rates(),
            config_dir: config_dir.clone(),
        };

        let config_file = config_dir.join("config.json");
        if config_file.exists() {
            match fs::read_to_string(&config_file)
                .map_err(ConfigError::from)
                .and_then(|raw| serde_json::from_str::<FileConfig>(&raw).map_err(ConfigError::from))
            {
                Ok(file_config) => config.apply(file_config),
                Err(error) => {
                    warn!(path = %config_file.display(), error = %error, "could not load config file");
                }
            }
        }

        config
    }

    fn apply(&mut self, file: FileConfig) {
        if let Some(url) = file.prometheus_url {
            self.prometheus_url = url;
        }
        if let Some(url) = file.network_subgraph_url {
            self.network_subgraph_url = url;
        }
        if let Some(id) = file.indexer_id {
            self.indexer_id = id;
        } else if let Some(id) = file.my_indexer_id {
            if self.indexer_id.is_empty() {
                self.indexer_id = id;
            }
        }
        if let Some(days) = file.allocation_max_days {
            self.allocation_max_days = days;
        }
        if let Some(rates) = file.chain_blocks_per_hour {
            self.chain_blocks_per_hour = rates;
        }
    }

    /// The one fatal configuration check: an operator identity is required
    /// before any classification work can begin.
    pub fn require_indexer_id(&self) -> Result<&str, ConfigError> {
        if self.indexer_id.is_empty() || self.indexer_id == "0x..." {
            return Err(ConfigError::MissingIndexerId);
        }
        Ok(&self.indexer_id)
    }

    pub fn expected_blocks_per_hour(&self, network: Option<&str>) -> f64 {
        network
            .and_then(|name| self.chain_blocks_per_hour.get(name))
            .copied()
            .unwrap_or(DEFAULT_BLOCKS_PER_HOUR)
    }
}

/// Default config directory: `~/.subgraph-health`, overridable via
/// `SUBGRAPH_HEALTH_DIR`.
pub fn default_config_dir() -> PathBuf {
    if let Ok(dir) = env::var("SUBGRAPH_HEALTH_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".subgraph-health")
}

/// Write a starter config file for `--init`.
pub fn write_default_config(config_dir: &Path) -> Result<PathBuf, ConfigError> {
    #[derive(Serialize)]
    struct DefaultConfig {
        prometheus_url: String,
        network_subgraph_url: String,
        indexer_id: String,
        allocation_max_days: i64,
        chain_blocks_per_hour: HashMap<String, f64>,
    }

    fs::create_dir_all(config_dir)?;
    let config_file = config_dir.join("config.json");
    let default = DefaultConfig {
        prometheus_url: "http://localhost:9090".to_owned(),
        network_subgraph_url: DEFAULT_NETWORK_SUBGRAPH_URL.to_owned(),
        indexer_id: "0x...".to_owned(),
        allocation_max_days: 28,
        chain_blocks_per_hour: default_chain_rates(),
    };
    fs::write(&config_file, serde_json::to_string_pretty(&default)?)?;
    Ok(config_file)
}

fn default_chain_rates() -> HashMap<String, f64> {
    [
        ("mainnet", 300.0),
        ("matic", 1800.0),
        ("arbitrum-one", 15000.0),
        ("base", 1800.0),
        ("bsc", 1200.0),
        ("avalanche", 1800.0),
        ("gnosis", 720.0),
        ("optimism", 1800.0),
        ("celo", 720.0),
        ("fantom", 3600.0),
        ("moonbeam", 500.0),
        ("moonriver", 500.0),
        ("polygon-zkevm", 300.0),
        ("zksync-era", 720.0),
        ("linea", 300.0),
        ("scroll", 300.0),
        ("sonic", 1800.0),
        ("arbitrum-sepolia", 15000.0),
    ]
    .into_iter()
    .map(|(network, rate)| (network.to_owned(), rate))
    .collect()
}
