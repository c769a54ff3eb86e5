//! In-process retrieval cache with TTL.
//!
//! Keyed by a digest of the full request profile (query, window, filters,
//! k, flags) so two requests differing only in a flag never share an
//! entry. Single-writer per process; short TTL makes cross-process
//! staleness acceptable. The conversational ask path never constructs one.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::ScoredChunk;

pub struct RetrievalCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, Vec<ScoredChunk>)>>,
}

impl RetrievalCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_secs),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Digest of the complete request profile
    pub fn key(profile: &impl serde::Serialize) -> String {
        let serialized = serde_json::to_string(profile).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub async fn get(&self, key: &str) -> Option<Vec<ScoredChunk>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((stored, results)) if stored.elapsed() < self.ttl => Some(results.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn put(&self, key: String, results: Vec<ScoredChunk>) {
        let mut entries = self.entries.lock().await;
        // Opportunistic expiry sweep keeps the map bounded.
        entries.retain(|_, (stored, _)| stored.elapsed() < self.ttl);
        entries.insert(key, (Instant::now(), results));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_includes_flag_profile() {
        let a = RetrievalCache::key(&("query", 168, true));
        let b = RetrievalCache::key(&("query", 168, false));
        assert_ne!(a, b);
        assert_eq!(a, RetrievalCache::key(&("query", 168, true)));
    }

    #[tokio::test]
    async fn test_put_get_and_expiry() {
        let cache = RetrievalCache::new(0);
        cache.put("k".to_string(), Vec::new()).await;
        // TTL zero: immediately stale.
        assert!(cache.get("k").await.is_none());

        let cache = RetrievalCache::new(60);
        cache.put("k".to_string(), Vec::new()).await;
        assert!(cache.get("k").await.is_some());
        assert!(cache.get("other").await.is_none());
    }
}
