//! TTL-bound buffer of recent observations awaiting promotion.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use luna_primitives::EntryId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::clock::{SharedClock, system_clock};
use crate::{MemoryError, MemoryResult};

/// Configuration for the short-term buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShortTermConfig {
    /// Seconds an entry stays readable.
    pub ttl_secs: u64,
    /// Maximum number of entries; the oldest is evicted beyond it.
    pub capacity: usize,
    /// Importance at or above which an entry is promotable.
    pub importance_threshold: f32,
    /// Reads after which an entry is promotable regardless of importance.
    pub min_accesses: u32,
}

impl ShortTermConfig {
    /// Returns the TTL as a duration.
    #[must_use]
    pub fn ttl(self) -> Duration {
        i64::try_from(self.ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] for a zero TTL or capacity, or a
    /// threshold outside `0.0..=1.0`.
    pub fn validate(self) -> MemoryResult<()> {
        if self.ttl_secs == 0 {
            return Err(MemoryError::InvalidConfig(
                "short-term ttl must be greater than zero",
            ));
        }
        if self.capacity == 0 {
            return Err(MemoryError::InvalidConfig(
                "short-term capacity must be greater than zero",
            ));
        }
        if !(0.0..=1.0).contains(&self.importance_threshold) {
            return Err(MemoryError::InvalidConfig(
                "importance threshold must be within 0.0..=1.0",
            ));
        }
        Ok(())
    }
}

impl Default for ShortTermConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            capacity: 100,
            importance_threshold: 0.7,
            min_accesses: 3,
        }
    }
}

/// Entry held in the short-term buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortTermEntry {
    /// Entry identifier.
    pub id: EntryId,
    /// Captured text.
    pub content: String,
    /// Provenance tag carried over on promotion.
    pub source: String,
    /// Insertion time.
    pub timestamp: DateTime<Utc>,
    /// Importance in `0.0..=1.0`.
    pub importance: f32,
    /// Optional category label.
    pub category: Option<String>,
    /// Number of reads through [`ShortTermMemory::get`] or [`ShortTermMemory::search`].
    pub access_count: u32,
    /// Free-form metadata.
    pub metadata: Map<String, Value>,
}

impl ShortTermEntry {
    /// Creates an entry with default importance `0.5`.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: EntryId::random(),
            content: content.into(),
            source: String::new(),
            timestamp: Utc::now(),
            importance: 0.5,
            category: None,
            access_count: 0,
            metadata: Map::new(),
        }
    }

    /// Sets the importance, clamped into `0.0..=1.0`.
    #[must_use]
    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    /// Sets the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Sets the provenance tag.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Seconds elapsed since insertion, never negative.
    #[must_use]
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_seconds().max(0)
    }

    /// Returns `true` once the entry's age exceeds `ttl`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.timestamp > ttl
    }

    fn is_promotable(&self, config: ShortTermConfig) -> bool {
        self.importance >= config.importance_threshold || self.access_count >= config.min_accesses
    }
}

/// Snapshot describing the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShortTermStats {
    /// Live entries.
    pub entries: usize,
    /// Live entries currently eligible for promotion.
    pub promotable: usize,
    /// Configured capacity.
    pub capacity: usize,
}

/// Short-term memory buffer.
///
/// Expired entries are dropped lazily at the start of every call; no sweep
/// thread exists for the buffer itself.
pub struct ShortTermMemory {
    config: ShortTermConfig,
    clock: SharedClock,
    entries: Mutex<VecDeque<ShortTermEntry>>,
}

impl ShortTermMemory {
    /// Creates an empty buffer on the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] when the configuration is invalid.
    pub fn new(config: ShortTermConfig) -> MemoryResult<Self> {
        Self::with_clock(config, system_clock())
    }

    /// Creates an empty buffer reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] when the configuration is invalid.
    pub fn with_clock(config: ShortTermConfig, clock: SharedClock) -> MemoryResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            entries: Mutex::new(VecDeque::new()),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> ShortTermConfig {
        self.config
    }

    /// Returns the clock used for timestamps and expiry.
    #[must_use]
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    fn purge(&self, entries: &mut VecDeque<ShortTermEntry>) -> usize {
        let now = self.clock.now();
        let ttl = self.config.ttl();
        let before = entries.len();
        entries.retain(|entry| !entry.is_expired(now, ttl));
        let expired = before - entries.len();
        if expired > 0 {
            debug!(expired, "dropped expired short-term entries");
        }
        expired
    }

    fn push(&self, entries: &mut VecDeque<ShortTermEntry>, entry: ShortTermEntry) {
        entries.push_back(entry);
        while entries.len() > self.config.capacity {
            if let Some(evicted) = entries.pop_front() {
                debug!(id = %evicted.id, "short-term buffer full; evicted oldest entry");
            }
        }
    }

    /// Inserts an entry stamped with the current time and a zero access count.
    pub fn add(&self, mut entry: ShortTermEntry) -> EntryId {
        let mut entries = self.entries.lock();
        self.purge(&mut entries);
        entry.timestamp = self.clock.now();
        entry.access_count = 0;
        let id = entry.id;
        self.push(&mut entries, entry);
        id
    }

    /// Reads an entry, counting the access.
    pub fn get(&self, id: EntryId) -> Option<ShortTermEntry> {
        let mut entries = self.entries.lock();
        self.purge(&mut entries);
        let entry = entries.iter_mut().find(|entry| entry.id == id)?;
        entry.access_count = entry.access_count.saturating_add(1);
        Some(entry.clone())
    }

    /// Case-insensitive substring search, newest first; counts an access on
    /// every returned entry.
    pub fn search(&self, query: &str, limit: usize) -> Vec<ShortTermEntry> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let mut entries = self.entries.lock();
        self.purge(&mut entries);
        entries
            .iter_mut()
            .rev()
            .filter(|entry| entry.content.to_lowercase().contains(&needle))
            .take(limit)
            .map(|entry| {
                entry.access_count = entry.access_count.saturating_add(1);
                entry.clone()
            })
            .collect()
    }

    /// Returns up to `limit` live entries, newest first.
    pub fn get_recent(&self, limit: usize) -> Vec<ShortTermEntry> {
        let mut entries = self.entries.lock();
        self.purge(&mut entries);
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Returns live entries whose importance or access count qualifies them
    /// for promotion, oldest first.
    pub fn get_promotable(&self) -> Vec<ShortTermEntry> {
        let mut entries = self.entries.lock();
        self.purge(&mut entries);
        entries
            .iter()
            .filter(|entry| entry.is_promotable(self.config))
            .cloned()
            .collect()
    }

    /// Removes and returns a live entry. Only one caller can take a given
    /// entry; this is what makes promotion exclusive.
    pub fn take(&self, id: EntryId) -> Option<ShortTermEntry> {
        let mut entries = self.entries.lock();
        self.purge(&mut entries);
        let position = entries.iter().position(|entry| entry.id == id)?;
        entries.remove(position)
    }

    /// Puts back an entry previously removed with [`take`](Self::take),
    /// keeping its timestamp. Expired or already present entries are dropped.
    pub fn restore(&self, entry: ShortTermEntry) -> bool {
        let mut entries = self.entries.lock();
        self.purge(&mut entries);
        if entry.is_expired(self.clock.now(), self.config.ttl())
            || entries.iter().any(|existing| existing.id == entry.id)
        {
            return false;
        }
        let position = entries
            .iter()
            .position(|existing| existing.timestamp > entry.timestamp)
            .unwrap_or(entries.len());
        entries.insert(position, entry);
        while entries.len() > self.config.capacity {
            entries.pop_front();
        }
        true
    }

    /// Drops expired entries now, returning how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        self.purge(&mut entries)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        self.purge(&mut entries);
        entries.len()
    }

    /// Returns whether no live entries remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns utilisation statistics.
    pub fn stats(&self) -> ShortTermStats {
        let mut entries = self.entries.lock();
        self.purge(&mut entries);
        ShortTermStats {
            entries: entries.len(),
            promotable: entries
                .iter()
                .filter(|entry| entry.is_promotable(self.config))
                .count(),
            capacity: self.config.capacity,
        }
    }
}

impl std::fmt::Debug for ShortTermMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShortTermMemory")
            .field("config", &self.config)
            .field("entries", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}
