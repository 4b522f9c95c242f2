use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{CacheBackend, CacheError, CachedEntry, glob_match};

#[derive(Debug, Clone)]
struct LocalEntry {
    value: String,
    expires_at: Instant,
}

/// Process-local tier.
///
/// Entries leave the map only by explicit delete; an entry past its deadline
/// is reported as missing and dropped on the next read.
#[derive(Debug, Default)]
pub struct LocalCache {
    entries: DashMap<String, LocalEntry>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_entry(&self, key: &str) -> Option<CachedEntry> {
        let now = Instant::now();
        let hit = self.entries.get(key).map(|e| {
            (
                e.value.clone(),
                e.expires_at.checked_duration_since(now).filter(|d| !d.is_zero()),
            )
        })?;

        match hit {
            (value, Some(remaining)) => Some(CachedEntry {
                value,
                ttl_remaining: Some(remaining),
            }),
            (_, None) => {
                self.entries.remove_if(key, |_, e| e.expires_at <= now);
                None
            }
        }
    }

    pub fn insert(&self, key: &str, value: String, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            LocalEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn remove_matching(&self, pattern: &str) -> u64 {
        let before = self.entries.len();
        self.entries.retain(|key, _| !glob_match(pattern, key));
        before.saturating_sub(self.entries.len()) as u64
    }
}

#[async_trait]
impl CacheBackend for LocalCache {
    async fn get(&self, key: &str) -> Result<Option<CachedEntry>, CacheError> {
        Ok(self.get_entry(key))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.insert(key, value, ttl);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.remove(key);
        Ok(())
    }

    async fn scan_del(&self, pattern: &str) -> Result<u64, CacheError> {
        Ok(self.remove_matching(pattern))
    }
}
