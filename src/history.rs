use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::models::ClassificationResult;

/// Issue kind recorded in history, with error failures sub-typed by peer
/// attribution. Precedence when a result carries several issues:
/// error > sync_too_slow > gap_growing > no_metrics > other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Error,
    ErrorOurIssue,
    ErrorSubgraphIssue,
    SyncTooSlow,
    GapGrowing,
    NoMetrics,
    Other,
}

impl IssueType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::ErrorOurIssue => "error our issue",
            Self::ErrorSubgraphIssue => "error subgraph issue",
            Self::SyncTooSlow => "sync too slow",
            Self::GapGrowing => "gap growing",
            Self::NoMetrics => "no metrics",
            Self::Other => "other",
        }
    }

    fn of(result: &ClassificationResult) -> Self {
        if result.has_error() {
            return match result.peers {
                Some(consensus) if consensus.healthy > 0 => Self::ErrorOurIssue,
                Some(_) => Self::ErrorSubgraphIssue,
                None => Self::Error,
            };
        }
        if result.has_sync_too_slow() {
            Self::SyncTooSlow
        } else if result.has_gap_growing() {
            Self::GapGrowing
        } else if result.has_no_metrics() {
            Self::NoMetrics
        } else {
            Self::Other
        }
    }
}

/// Cross-run memory of one deployment's issue state. At most one unresolved
/// entry exists per hash; a deployment failing again after resolving reopens
/// its entry with a fresh first_seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueHistoryEntry {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub issue_type: IssueType,
    #[serde(default)]
    pub network: String,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestamp: DateTime<Utc>,
    pub total_issues: usize,
    pub new_count: usize,
    pub resolved_count: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryData {
    #[serde(default)]
    issues: BTreeMap<String, IssueHistoryEntry>,
    #[serde(default)]
    runs: Vec<DateTime<Utc>>,
    #[serde(default)]
    last_run: Option<RunRecord>,
}

/// One entry of a run's new/resolved delta.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueChange {
    pub ipfs_hash: String,
    pub issue_type: IssueType,
    pub network: String,
    pub allocated_tokens: u128,
    /// How long the issue had been present; set for resolved entries.
    pub duration: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunDelta {
    pub new: Vec<IssueChange>,
    pub resolved: Vec<IssueChange>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

const MAX_RUNS: usize = 100;

/// Persists which deployments currently have an unresolved issue and
/// computes the new/resolved delta per run.
#[derive(Debug)]
pub struct HistoryManager {
    path: PathBuf,
    data: HistoryData,
}

impl HistoryManager {
    /// Load history from `<config_dir>/history.json`. A missing or
    /// malformed file is treated as no prior state, never a fatal error.
    pub fn open(config_dir: &Path) -> Self {
        let path = config_dir.join("history.json");
        let data = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<HistoryData>(&raw) {
                Ok(data) => data,
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "malformed history file, starting fresh");
                    HistoryData::default()
                }
            },
            Err(_) => HistoryData::default(),
        };
        Self { path, data }
    }

    pub fn record_run(&mut self, results: &[ClassificationResult]) -> Result<RunDelta, StoreError> {
        self.record_run_at(results, Utc::now())
    }

    pub fn record_run_at(
        &mut self,
        results: &[ClassificationResult],
        now: DateTime<Utc>,
    ) -> Result<RunDelta, StoreError> {
        let mut current: BTreeMap<String, (IssueType, String, u128)> = BTreeMap::new();
        for result in results {
            if result.is_healthy() || result.allocation.ipfs_hash.is_empty() {
                continue;
            }
            current.insert(
                result.allocation.ipfs_hash.clone(),
                (
                    IssueType::of(result),
                    result.allocation.network.clone().unwrap_or_default(),
                    result.allocation.allocated_tokens,
                ),
            );
        }

        let previous_active: Vec<String> = self
            .data
            .issues
            .iter()
            .filter(|(_, entry)| entry.resolved_at.is_none())
            .map(|(hash, _)| hash.clone())
            .collect();

        let mut delta = RunDelta::default();

        for (hash, (issue_type, network, allocated_tokens)) in &current {
            match self.data.issues.get_mut(hash) {
                Some(entry) if entry.resolved_at.is_none() => {
                    // Already tracked; update silently.
                    entry.last_seen = now;
                    entry.issue_type = *issue_type;
                }
                Some(entry) => {
                    // Resolved earlier and failing again: reopen.
                    entry.first_seen = now;
                    entry.last_seen = now;
                    entry.issue_type = *issue_type;
                    entry.resolved_at = None;
                    delta.new.push(IssueChange {
                        ipfs_hash: hash.clone(),
                        issue_type: *issue_type,
                        network: network.clone(),
                        allocated_tokens: *allocated_tokens,
                        duration: None,
                    });
                }
                None => {
                    self.data.issues.insert(
                        hash.clone(),
                        IssueHistoryEntry {
                            first_seen: now,
                            last_seen: now,
                            issue_type: *issue_type,
                            network: network.clone(),
                            resolved_at: None,
                        },
                    );
                    delta.new.push(IssueChange {
                        ipfs_hash: hash.clone(),
                        issue_type: *issue_type,
                        network: network.clone(),
                        allocated_tokens: *allocated_tokens,
                        duration: None,
                    });
                }
            }
        }

        for hash in previous_active {
            if current.contains_key(&hash) {
                continue;
            }
            if let Some(entry) = self.data.issues.get_mut(&hash) {
                entry.resolved_at = Some(now);
                delta.resolved.push(IssueChange {
                    ipfs_hash: hash.clone(),
                    issue_type: entry.issue_type,
                    network: entry.network.clone(),
                    allocated_tokens: 0,
                    duration: Some(duration_bucket(entry.first_seen, now)),
                });
            }
        }

        self.data.runs.push(now);
        if self.data.runs.len() > MAX_RUNS {
            let excess = self.data.runs.len() - MAX_RUNS;
            self.data.runs.drain(..excess);
        }
        self.data.last_run = Some(RunRecord {
            timestamp: now,
            total_issues: current.len(),
            new_count: delta.new.len(),
            resolved_count: delta.resolved.len(),
        });

        self.save()?;
        Ok(delta)
    }

    /// How long the deployment's current issue has been present, if it has
    /// an unresolved one.
    pub fn issue_duration(&self, ipfs_hash: &str) -> Option<String> {
        self.issue_duration_at(ipfs_hash, Utc::now())
    }

    pub fn issue_duration_at(&self, ipfs_hash: &str, now: DateTime<Utc>) -> Option<String> {
        let entry = self.data.issues.get(ipfs_hash)?;
        if entry.resolved_at.is_some() {
            return None;
        }
        Some(duration_bucket(entry.first_seen, now))
    }

    pub fn last_run(&self) -> Option<&RunRecord> {
        self.data.last_run.as_ref()
    }

    fn save(&self) -> Result<(), StoreError> {
        fs::write(&self.path, serde_json::to_string_pretty(&self.data)?)?;
        Ok(())
    }
}

fn duration_bucket(first_seen: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - first_seen).num_seconds();
    if seconds < 60 {
        "just now".to_owned()
    } else if seconds < 3600 {
        format!("{}m", seconds / 60)
    } else if seconds < 86400 {
        format!("{}h", seconds / 3600)
    } else {
        format!("{}d", seconds / 86400)
    }
}
