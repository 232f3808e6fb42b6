//! Health monitor for subgraph deployments with active allocations.
//!
//! Correlates graph-node Prometheus telemetry, chain-head progress, and the
//! reported status of other indexers serving the same deployments, then
//! diffs the outcome against the previous run so regressions and recoveries
//! are visible across invocations.

pub mod ack;
pub mod cache;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod format;
pub mod history;
pub mod metrics;
pub mod models;
pub mod network;
pub mod peers;
pub mod report;
pub mod service;
