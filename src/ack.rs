use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Duration, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::history::StoreError;

/// Why an operator suppressed a known issue. The category fixes the default
/// lifetime of the suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AckCategory {
    /// Permanently ignored.
    Ignore,
    /// Work in progress; expires after 7 days.
    Wip,
    /// External or upstream issue; expires after 30 days.
    External,
}

impl AckCategory {
    fn lifetime(self) -> Option<Duration> {
        match self {
            Self::Ignore => None,
            Self::Wip => Some(Duration::days(7)),
            Self::External => Some(Duration::days(30)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgement {
    #[serde(default)]
    pub reason: String,
    pub category: AckCategory,
    pub acknowledged_at: DateTime<Utc>,
    pub expires: Option<DateTime<Utc>>,
}

/// Operator-entered suppressions of known issues. Expired entries are
/// treated as absent by every reader and purged before the read returns.
#[derive(Debug)]
pub struct AckManager {
    path: PathBuf,
    data: BTreeMap<String, Acknowledgement>,
}

impl AckManager {
    /// Load acknowledgements from `<config_dir>/acknowledged.json`; a
    /// missing or malformed file means no acknowledgements.
    pub fn open(config_dir: &Path) -> Self {
        let path = config_dir.join("acknowledged.json");
        let data = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(data) => data,
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "malformed acknowledgement file, starting fresh");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self { path, data }
    }

    pub fn acknowledge(
        &mut self,
        ipfs_hash: &str,
        reason: &str,
        category: AckCategory,
        explicit_expiry: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.acknowledge_at(ipfs_hash, reason, category, explicit_expiry, Utc::now())
    }

    pub fn acknowledge_at(
        &mut self,
        ipfs_hash: &str,
        reason: &str,
        category: AckCategory,
        explicit_expiry: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let expires = explicit_expiry.or_else(|| category.lifetime().map(|lifetime| now + lifetime));
        self.data.insert(
            ipfs_hash.to_owned(),
            Acknowledgement {
                reason: reason.to_owned(),
                category,
                acknowledged_at: now,
                expires,
            },
        );
        self.save()
    }

    /// Remove an acknowledgement; false if none existed.
    pub fn unacknowledge(&mut self, ipfs_hash: &str) -> Result<bool, StoreError> {
        if self.data.remove(ipfs_hash).is_none() {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    pub fn is_acknowledged(&mut self, ipfs_hash: &str) -> Option<Acknowledgement> {
        self.is_acknowledged_at(ipfs_hash, Utc::now())
    }

    pub fn is_acknowledged_at(
        &mut self,
        ipfs_hash: &str,
        now: DateTime<Utc>,
    ) -> Option<Acknowledgement> {
        let ack = self.data.get(ipfs_hash)?;
        if ack.expires.is_some_and(|expires| now > expires) {
            self.data.remove(ipfs_hash);
            if let Err(error) = self.save() {
                warn!(ipfs_hash, error = %error, "could not persist acknowledgement purge");
            }
            return None;
        }
        Some(ack.clone())
    }

    pub fn list_all(&mut self) -> Vec<(String, Acknowledgement)> {
        self.list_all_at(Utc::now())
    }

    pub fn list_all_at(&mut self, now: DateTime<Utc>) -> Vec<(String, Acknowledgement)> {
        let expired: Vec<String> = self
            .data
            .iter()
            .filter(|(_, ack)| ack.expires.is_some_and(|expires| now > expires))
            .map(|(hash, _)| hash.clone())
            .collect();

        if !expired.is_empty() {
            for hash in &expired {
                self.data.remove(hash);
            }
            if let Err(error) = self.save() {
                warn!(error = %error, "could not persist acknowledgement purge");
            }
        }

        self.data
            .iter()
            .map(|(hash, ack)| (hash.clone(), ack.clone()))
            .collect()
    }

    fn save(&self) -> Result<(), StoreError> {
        fs::write(&self.path, serde_json::to_string_pretty(&self.data)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap_or_default()
    }

    fn manager() -> Option<(tempfile::TempDir, AckManager)> {
        let dir = tempfile::tempdir().ok()?;
        let manager = AckManager::open(dir.path());
        Some((dir, manager))
    }

    #[test]
    fn wip_acknowledgements_expire_after_seven_days() {
        let Some((_dir, mut acks)) = manager() else { return };
        let start = at(0);
        assert!(
            acks.acknowledge_at("QmA", "debugging", AckCategory::Wip, None, start)
                .is_ok()
        );

        let just_before = start + Duration::days(7) - Duration::seconds(1);
        assert!(acks.is_acknowledged_at("QmA", just_before).is_some());

        let just_after = start + Duration::days(7) + Duration::seconds(1);
        assert!(acks.is_acknowledged_at("QmA", just_after).is_none());
        // Lazy purge removed the entry entirely.
        assert!(acks.list_all_at(just_after).is_empty());
    }

    #[test]
    fn ignore_acknowledgements_never_expire() {
        let Some((_dir, mut acks)) = manager() else { return };
        assert!(
            acks.acknowledge_at("QmA", "", AckCategory::Ignore, None, at(0))
                .is_ok()
        );
        let far_future = at(0) + Duration::days(10_000);
        assert!(acks.is_acknowledged_at("QmA", far_future).is_some());
    }

    #[test]
    fn explicit_expiry_overrides_the_category_default() {
        let Some((_dir, mut acks)) = manager() else { return };
        let start = at(0);
        let explicit = start + Duration::days(1);
        assert!(
            acks.acknowledge_at("QmA", "", AckCategory::External, Some(explicit), start)
                .is_ok()
        );
        assert!(
            acks.is_acknowledged_at("QmA", start + Duration::days(2))
                .is_none()
        );
    }

    #[test]
    fn list_all_purges_expired_entries_before_returning() {
        let Some((_dir, mut acks)) = manager() else { return };
        let start = at(0);
        assert!(
            acks.acknowledge_at("QmExpired", "", AckCategory::Wip, None, start)
                .is_ok()
        );
        assert!(
            acks.acknowledge_at("QmKept", "", AckCategory::Ignore, None, start)
                .is_ok()
        );

        let listed = acks.list_all_at(start + Duration::days(8));
        assert_eq!(listed.len(), 1);
        assert!(listed.first().is_some_and(|(hash, _)| hash == "QmKept"));
    }

    #[test]
    fn unacknowledge_reports_whether_an_entry_existed() {
        let Some((_dir, mut acks)) = manager() else { return };
        assert!(
            acks.acknowledge_at("QmA", "", AckCategory::Wip, None, at(0))
                .is_ok()
        );
        assert_eq!(acks.unacknowledge("QmA").ok(), Some(true));
        assert_eq!(acks.unacknowledge("QmA").ok(), Some(false));
    }

    #[test]
    fn acknowledgements_survive_reopen() {
        let Some((dir, mut acks)) = manager() else { return };
        assert!(
            acks.acknowledge_at("QmA", "known upstream bug", AckCategory::External, None, at(0))
                .is_ok()
        );

        let mut reopened = AckManager::open(dir.path());
        let ack = reopened.is_acknowledged_at("QmA", at(60));
        assert!(ack.is_some_and(|ack| ack.reason == "known upstream bug"));
    }
}
