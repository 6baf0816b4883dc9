//! Bounded LRU cache of recently computed embeddings.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::clock::{SharedClock, system_clock};
use crate::embeddings::EmbeddingVector;
use crate::{MemoryError, MemoryResult};

/// Configuration for the embedding cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached embeddings.
    pub max_entries: usize,
    /// Seconds after which a cached embedding is discarded.
    pub ttl_secs: u64,
}

impl CacheConfig {
    /// Creates a configuration with the provided bounds.
    #[must_use]
    pub const fn new(max_entries: usize, ttl_secs: u64) -> Self {
        Self {
            max_entries,
            ttl_secs,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] when either bound is zero.
    pub fn validate(self) -> MemoryResult<()> {
        if self.max_entries == 0 {
            return Err(MemoryError::InvalidConfig(
                "embedding cache must hold at least one entry",
            ));
        }
        if self.ttl_secs == 0 {
            return Err(MemoryError::InvalidConfig(
                "embedding cache ttl must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            ttl_secs: 3600,
        }
    }
}

struct CachedEmbedding {
    vector: EmbeddingVector,
    stored_at: DateTime<Utc>,
}

/// Maps normalised text to its embedding.
///
/// Expiry is lazy: an entry older than the TTL is dropped when a lookup finds
/// it. Every hit refreshes the entry's recency. The cache is not synchronised;
/// its owner serialises access.
pub struct EmbeddingCache {
    entries: LruCache<u64, CachedEmbedding>,
    ttl: Duration,
    clock: SharedClock,
}

impl EmbeddingCache {
    /// Creates a cache using the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] when the configuration is invalid.
    pub fn new(config: CacheConfig) -> MemoryResult<Self> {
        Self::with_clock(config, system_clock())
    }

    /// Creates a cache reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] when the configuration is invalid.
    pub fn with_clock(config: CacheConfig, clock: SharedClock) -> MemoryResult<Self> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.max_entries).ok_or(MemoryError::InvalidConfig(
            "embedding cache must hold at least one entry",
        ))?;
        let ttl = i64::try_from(config.ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or(MemoryError::InvalidConfig("embedding cache ttl is too large"))?;
        Ok(Self {
            entries: LruCache::new(capacity),
            ttl,
            clock,
        })
    }

    /// Returns the cached embedding for `text`, if present and fresh.
    pub fn get(&mut self, text: &str) -> Option<EmbeddingVector> {
        let key = cache_key(text);
        let now = self.clock.now();
        let expired = match self.entries.get(&key) {
            Some(entry) if now - entry.stored_at <= self.ttl => {
                return Some(entry.vector.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.pop(&key);
        }
        None
    }

    /// Stores the embedding for `text`, evicting the least recently used
    /// entry when full.
    pub fn set(&mut self, text: &str, vector: EmbeddingVector) {
        let stored_at = self.clock.now();
        self.entries
            .put(cache_key(text), CachedEmbedding { vector, stored_at });
    }

    /// Number of cached entries, including any not yet found to be expired.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingCache")
            .field("entries", &self.entries.len())
            .field("capacity", &self.entries.cap())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

fn cache_key(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    for word in text.split_whitespace() {
        word.to_lowercase().hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn vector(values: &[f32]) -> EmbeddingVector {
        EmbeddingVector::from_slice(values).unwrap()
    }

    #[test]
    fn lookup_ignores_case_and_whitespace() {
        let mut cache = EmbeddingCache::new(CacheConfig::new(4, 60)).unwrap();
        cache.set("Good  Morning", vector(&[1.0, 0.0]));
        assert_eq!(cache.get(" good morning\n"), Some(vector(&[1.0, 0.0])));
        assert_eq!(cache.get("good evening"), None);
    }

    #[test]
    fn expired_entries_are_evicted_on_lookup() {
        let clock = ManualClock::default();
        let mut cache =
            EmbeddingCache::with_clock(CacheConfig::new(4, 60), Arc::new(clock.clone())).unwrap();
        cache.set("alpha", vector(&[1.0]));

        clock.advance(Duration::seconds(60));
        assert!(cache.get("alpha").is_some());

        clock.advance(Duration::seconds(1));
        assert!(cache.get("alpha").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn hits_refresh_recency() {
        let mut cache = EmbeddingCache::new(CacheConfig::new(2, 60)).unwrap();
        cache.set("a", vector(&[1.0]));
        cache.set("b", vector(&[2.0]));
        assert!(cache.get("a").is_some());

        cache.set("c", vector(&[3.0]));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none(), "b was least recently used");
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = EmbeddingCache::new(CacheConfig::new(0, 60)).expect_err("zero capacity");
        assert!(matches!(err, MemoryError::InvalidConfig(_)));
    }
}
