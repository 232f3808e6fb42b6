use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::Parser;
use subgraph_health::{
    ack::AckManager,
    cache::TtlCache,
    cli::Cli,
    config::{self, AppConfig},
    history::HistoryManager,
    metrics::PrometheusClient,
    network::NetworkSubgraphClient,
    peers::{ConsensusChecker, HttpPeerProbe},
    report,
    service::run_once,
};
use tracing::error;

const PEER_CACHE_TTL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(error) = run().await {
        error!(error = %error, "subgraph-health failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let cli = Cli::parse();
    let config_dir = config::default_config_dir();

    if cli.init {
        let path = config::write_default_config(&config_dir).map_err(|error| error.to_string())?;
        println!("Created default config at: {}", path.display());
        println!("Please edit this file with your settings.");
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir).map_err(|error| error.to_string())?;
    let config = AppConfig::load(config_dir.clone());
    let mut acks = AckManager::open(&config_dir);

    if let Some(hash) = cli.ack.as_deref() {
        let expires = parse_expiry(cli.expires.as_deref())?;
        acks.acknowledge(hash, &cli.reason, cli.category, expires)
            .map_err(|error| error.to_string())?;
        println!("Acknowledged: {hash}");
        return Ok(());
    }

    if let Some(hash) = cli.unack.as_deref() {
        let removed = acks.unacknowledge(hash).map_err(|error| error.to_string())?;
        if removed {
            println!("Removed acknowledgement: {hash}");
        } else {
            println!("Not found: {hash}");
        }
        return Ok(());
    }

    if cli.list_ack {
        let all = acks.list_all();
        if all.is_empty() {
            println!("No acknowledgements");
            return Ok(());
        }
        println!();
        println!("Acknowledged Issues:");
        println!();
        for (hash, ack) in all {
            let expires = ack
                .expires
                .map(|expires| expires.to_rfc3339())
                .unwrap_or_else(|| "never".to_owned());
            println!("  {hash}");
            println!(
                "    Category: {:?}, Expires: {expires}",
                ack.category
            );
            if !ack.reason.is_empty() {
                println!("    Reason: {}", ack.reason);
            }
        }
        return Ok(());
    }

    let indexer_id = config
        .require_indexer_id()
        .map_err(|error| error.to_string())?
        .to_owned();

    println!("Checking subgraph health for indexer: {indexer_id}");
    println!("Prometheus: {}", config.prometheus_url);

    let prometheus = PrometheusClient::new(&config.prometheus_url);
    let network = NetworkSubgraphClient::new(&config.network_subgraph_url);
    let cache = TtlCache::new(config_dir.join("cache"), PEER_CACHE_TTL);
    let mut checker = ConsensusChecker::new(HttpPeerProbe::default(), cache);
    let mut history = HistoryManager::open(&config_dir);

    let allocations = network.indexer_allocations(&indexer_id).await;
    println!("Found {} active allocations", allocations.len());
    if allocations.is_empty() {
        println!("No active allocations found");
        return Ok(());
    }

    let outcome = run_once(
        &config,
        &prometheus,
        &network,
        allocations,
        &mut checker,
        &mut history,
    )
    .await
    .map_err(|error| error.to_string())?;

    let now = Utc::now();
    let buckets = report::bucket_results(outcome.results, &mut acks, cli.show_ack, now);
    report::render(&buckets, &outcome.delta, &history, &mut acks, now);

    Ok(())
}

fn parse_expiry(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, String> {
    let Some(raw) = raw else { return Ok(None) };
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| Some(parsed.with_timezone(&Utc)))
        .map_err(|_| format!("Invalid date format: {raw}"))
}
