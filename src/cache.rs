use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use chrono::Utc;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::warn;

/// Two-tier TTL cache: an in-process map backed by one JSON file per key.
/// A durable hit repopulates the memory tier; an expired or malformed file
/// is a miss, never an error. There is no active sweeping, so stale files
/// may linger on disk past their logical expiry.
#[derive(Debug)]
pub struct TtlCache {
    dir: PathBuf,
    ttl_seconds: i64,
    memory: HashMap<String, CacheEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    data: Value,
    /// Unix seconds.
    expires: i64,
}

impl TtlCache {
    pub fn new(dir: PathBuf, ttl: Duration) -> Self {
        if let Err(error) = fs::create_dir_all(&dir) {
            warn!(path = %dir.display(), error = %error, "could not create cache directory");
        }
        Self {
            dir,
            ttl_seconds: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
            memory: HashMap::new(),
        }
    }

    pub fn get<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        self.get_at(key, Utc::now().timestamp())
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) {
        self.set_at(key, value, Utc::now().timestamp());
    }

    pub(crate) fn get_at<T: DeserializeOwned>(&mut self, key: &str, now: i64) -> Option<T> {
        if let Some(entry) = self.memory.get(key) {
            if now < entry.expires {
                return serde_json::from_value(entry.data.clone()).ok();
            }
        }

        let path = self.entry_path(key);
        let raw = fs::read_to_string(path).ok()?;
        let entry = serde_json::from_str::<CacheEntry>(&raw).ok()?;
        if now >= entry.expires {
            return None;
        }
        let value = serde_json::from_value(entry.data.clone()).ok()?;
        self.memory.insert(key.to_owned(), entry);
        Some(value)
    }

    pub(crate) fn set_at<T: Serialize>(&mut self, key: &str, value: &T, now: i64) {
        let data = match serde_json::to_value(value) {
            Ok(data) => data,
            Err(error) => {
                warn!(key, error = %error, "could not serialize cache entry");
                return;
            }
        };
        let entry = CacheEntry {
            data,
            expires: now.saturating_add(self.ttl_seconds),
        };
        let path = self.entry_path(key);
        match serde_json::to_string(&entry) {
            Ok(raw) => {
                if let Err(error) = fs::write(&path, raw) {
                    warn!(path = %path.display(), error = %error, "could not persist cache entry");
                }
            }
            Err(error) => warn!(key, error = %error, "could not serialize cache entry"),
        }
        self.memory.insert(key.to_owned(), entry);
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        healthy: bool,
        latest_block: u64,
    }

    fn payload() -> Payload {
        Payload {
            healthy: true,
            latest_block: 42,
        }
    }

    #[test]
    fn round_trips_through_memory_tier() {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(_) => return,
        };
        let mut cache = TtlCache::new(dir.path().to_path_buf(), Duration::from_secs(300));
        cache.set_at("peer_a", &payload(), 1000);
        assert_eq!(cache.get_at::<Payload>("peer_a", 1100), Some(payload()));
    }

    #[test]
    fn durable_tier_survives_a_new_process() {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(_) => return,
        };
        let mut first = TtlCache::new(dir.path().to_path_buf(), Duration::from_secs(300));
        first.set_at("peer_a", &payload(), 1000);

        let mut second = TtlCache::new(dir.path().to_path_buf(), Duration::from_secs(300));
        assert_eq!(second.get_at::<Payload>("peer_a", 1100), Some(payload()));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(_) => return,
        };
        let mut cache = TtlCache::new(dir.path().to_path_buf(), Duration::from_secs(300));
        cache.set_at("peer_a", &payload(), 1000);
        assert_eq!(cache.get_at::<Payload>("peer_a", 1300), None::<Payload>);
    }

    #[test]
    fn malformed_durable_entry_is_a_miss() {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(_) => return,
        };
        assert!(fs::write(dir.path().join("peer_a.json"), "{garbage").is_ok());
        let mut cache = TtlCache::new(dir.path().to_path_buf(), Duration::from_secs(300));
        assert_eq!(cache.get_at::<Payload>("peer_a", 1000), None::<Payload>);
    }
}
