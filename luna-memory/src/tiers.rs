//! Coordinates the short-, medium- and long-term memories.
//!
//! New observations are routed by their `source` tag. Short-term entries move
//! into long-term memory through a background promotion loop, and urgent
//! entries additionally get an individual delayed promotion.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use luna_primitives::{EntryId, MemoryId, MemoryTier, TierRouting};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::record::MemoryMetadata;
use crate::semantic::{AddOutcome, SemanticMemory};
use crate::short_term::{ShortTermConfig, ShortTermEntry, ShortTermMemory, ShortTermStats};
use crate::store::StoreStats;
use crate::worker::PeriodicWorker;
use crate::{MemoryError, MemoryResult};

const JOIN_POLL: Duration = Duration::from_millis(5);
const SHORT_TERM_SOURCE: &str = "short_term";

/// Receiver of promoted short-term entries.
pub trait PromotionTarget: Send + Sync {
    /// Persists the entry, returning the identifier it is stored under.
    ///
    /// # Errors
    ///
    /// Any error leaves the entry in the short-term buffer for a later retry.
    fn accept(&self, entry: &ShortTermEntry) -> MemoryResult<MemoryId>;
}

impl PromotionTarget for SemanticMemory {
    fn accept(&self, entry: &ShortTermEntry) -> MemoryResult<MemoryId> {
        let mut metadata = MemoryMetadata::default().with_importance(entry.importance);
        metadata.category.clone_from(&entry.category);
        metadata.extra.clone_from(&entry.metadata);
        metadata
            .extra
            .insert("promoted_from".into(), Value::from(SHORT_TERM_SOURCE));
        metadata
            .extra
            .insert("access_count".into(), Value::from(entry.access_count));

        let source = if entry.source.is_empty() {
            SHORT_TERM_SOURCE
        } else {
            entry.source.as_str()
        };
        let outcome = self.add_text(&entry.content, source, metadata)?;
        Ok(outcome.id().clone())
    }
}

/// Configuration for [`MemoryTierManager`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Source-to-tier routing table.
    pub routing: TierRouting,
    /// Importance at or above which a short-term entry gets its own delayed promotion.
    pub urgent_importance: f32,
    /// Delay before an urgent entry is promoted.
    pub urgent_delay_ms: u64,
    /// Polling interval of the promotion loop.
    pub promotion_interval_secs: u64,
    /// Age after which medium-term records are decayed.
    pub medium_retention_days: u32,
    /// Minimum similarity for vector hits returned by [`MemoryTierManager::recall`].
    pub recall_min_similarity: f32,
    /// How long [`MemoryTierManager::stop`] waits for background threads.
    pub shutdown_timeout_ms: u64,
}

impl TierConfig {
    /// Returns the urgent promotion delay.
    #[must_use]
    pub fn urgent_delay(&self) -> Duration {
        Duration::from_millis(self.urgent_delay_ms)
    }

    /// Returns the promotion loop interval.
    #[must_use]
    pub fn promotion_interval(&self) -> Duration {
        Duration::from_secs(self.promotion_interval_secs)
    }

    /// Returns the bounded join timeout.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] for a zero promotion interval or
    /// retention, or thresholds outside their ranges.
    pub fn validate(&self) -> MemoryResult<()> {
        if self.promotion_interval_secs == 0 {
            return Err(MemoryError::InvalidConfig(
                "promotion interval must be greater than zero",
            ));
        }
        if self.medium_retention_days == 0 {
            return Err(MemoryError::InvalidConfig(
                "medium-term retention must be at least one day",
            ));
        }
        if !(0.0..=1.0).contains(&self.urgent_importance) {
            return Err(MemoryError::InvalidConfig(
                "urgent importance must be within 0.0..=1.0",
            ));
        }
        if !(-1.0..=1.0).contains(&self.recall_min_similarity) {
            return Err(MemoryError::InvalidConfig(
                "recall similarity floor must be within -1.0..=1.0",
            ));
        }
        Ok(())
    }
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            routing: TierRouting::default(),
            urgent_importance: 0.9,
            urgent_delay_ms: 500,
            promotion_interval_secs: 60,
            medium_retention_days: 30,
            recall_min_similarity: 0.0,
            shutdown_timeout_ms: 2_000,
        }
    }
}

/// Where [`MemoryTierManager::remember`] put a memory.
#[derive(Debug, Clone, PartialEq)]
pub enum Remembered {
    /// Buffered in short-term memory.
    ShortTerm(EntryId),
    /// Written to a persisted tier.
    Stored {
        /// Tier that received the text.
        tier: MemoryTier,
        /// Insert or merge outcome.
        outcome: AddOutcome,
    },
}

impl Remembered {
    /// Returns the tier the memory landed in.
    #[must_use]
    pub fn tier(&self) -> MemoryTier {
        match self {
            Self::ShortTerm(_) => MemoryTier::ShortTerm,
            Self::Stored { tier, .. } => *tier,
        }
    }
}

/// Result of a batch promotion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PromotionReport {
    /// Entries written to long-term memory and removed from the buffer.
    pub promoted: usize,
    /// Entries whose write failed; they stay buffered.
    pub failed: usize,
}

/// Result of [`MemoryTierManager::decay`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecayReport {
    /// Medium-term records removed for age.
    pub medium_term_removed: usize,
    /// Short-term entries dropped as expired.
    pub short_term_expired: usize,
}

/// A recalled memory tagged with its tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecallHit {
    /// Tier the memory was found in.
    pub tier: MemoryTier,
    /// Record or entry identifier.
    pub id: String,
    /// Stored text.
    pub text: String,
    /// Provenance tag.
    pub source: String,
    /// Cosine similarity; keyword matches from short-term memory score `1.0`.
    pub similarity: f32,
}

/// Snapshot of every tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierStats {
    /// Short-term buffer utilisation.
    pub short_term: ShortTermStats,
    /// Medium-term store statistics.
    pub medium_term: StoreStats,
    /// Long-term store statistics.
    pub long_term: StoreStats,
    /// Successful promotions since start.
    pub promoted: u64,
    /// Failed promotion attempts since start.
    pub promotion_failures: u64,
    /// Whether the promotion loop is running.
    pub promotion_loop_running: bool,
}

struct Promoter {
    short_term: ShortTermMemory,
    target: Arc<dyn PromotionTarget>,
    promoted: AtomicU64,
    failed: AtomicU64,
}

impl Promoter {
    fn promote(&self, id: EntryId) -> MemoryResult<Option<MemoryId>> {
        // `take` hands the entry to exactly one caller.
        let Some(entry) = self.short_term.take(id) else {
            return Ok(None);
        };
        match self.target.accept(&entry) {
            Ok(memory_id) => {
                self.promoted.fetch_add(1, Ordering::Relaxed);
                info!(entry = %id, memory = %memory_id, "promoted short-term memory");
                Ok(Some(memory_id))
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(entry = %id, error = %err, "promotion failed; entry kept for retry");
                self.short_term.restore(entry);
                Err(MemoryError::promotion(err.to_string()))
            }
        }
    }

    fn promote_batch(&self) -> PromotionReport {
        let mut report = PromotionReport::default();
        for entry in self.short_term.get_promotable() {
            match self.promote(entry.id) {
                Ok(Some(_)) => report.promoted += 1,
                Ok(None) => {}
                Err(_) => report.failed += 1,
            }
        }
        if report.promoted > 0 || report.failed > 0 {
            debug!(promoted = report.promoted, failed = report.failed, "promotion batch finished");
        }
        report
    }
}

#[derive(Default)]
struct ShutdownSignal {
    triggered: Mutex<bool>,
    wake: Condvar,
}

impl ShutdownSignal {
    fn trigger(&self) {
        *self.triggered.lock() = true;
        self.wake.notify_all();
    }

    fn is_triggered(&self) -> bool {
        *self.triggered.lock()
    }

    /// Sleeps up to `timeout`, returning `true` if shutdown was triggered.
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut triggered = self.triggered.lock();
        while !*triggered {
            if self.wake.wait_until(&mut triggered, deadline).timed_out() {
                break;
            }
        }
        *triggered
    }
}

/// Builder for [`MemoryTierManager`].
pub struct MemoryTierManagerBuilder {
    config: TierConfig,
    short_term: Option<ShortTermMemory>,
    medium_term: Option<Arc<SemanticMemory>>,
    long_term: Option<Arc<SemanticMemory>>,
    target: Option<Arc<dyn PromotionTarget>>,
}

impl MemoryTierManagerBuilder {
    /// Starts a builder with the supplied configuration.
    #[must_use]
    pub fn new(config: TierConfig) -> Self {
        Self {
            config,
            short_term: None,
            medium_term: None,
            long_term: None,
            target: None,
        }
    }

    /// Installs the short-term buffer. Defaults to a buffer with
    /// [`ShortTermConfig::default`].
    #[must_use]
    pub fn with_short_term(mut self, short_term: ShortTermMemory) -> Self {
        self.short_term = Some(short_term);
        self
    }

    /// Installs the medium-term memory. Required.
    #[must_use]
    pub fn with_medium_term(mut self, memory: Arc<SemanticMemory>) -> Self {
        self.medium_term = Some(memory);
        self
    }

    /// Installs the long-term memory. Required.
    #[must_use]
    pub fn with_long_term(mut self, memory: Arc<SemanticMemory>) -> Self {
        self.long_term = Some(memory);
        self
    }

    /// Overrides where promoted entries are written. Defaults to the long-term memory.
    #[must_use]
    pub fn with_promotion_target(mut self, target: Arc<dyn PromotionTarget>) -> Self {
        self.target = Some(target);
        self
    }

    /// Builds the manager. The promotion loop is not started.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] when the configuration is
    /// invalid or a persisted tier is missing.
    pub fn build(self) -> MemoryResult<MemoryTierManager> {
        self.config.validate()?;
        let medium_term = self
            .medium_term
            .ok_or(MemoryError::InvalidConfig("medium-term memory is required"))?;
        let long_term = self
            .long_term
            .ok_or(MemoryError::InvalidConfig("long-term memory is required"))?;
        let short_term = match self.short_term {
            Some(short_term) => short_term,
            None => ShortTermMemory::new(ShortTermConfig::default())?,
        };
        let target = self
            .target
            .unwrap_or_else(|| Arc::clone(&long_term) as Arc<dyn PromotionTarget>);

        Ok(MemoryTierManager {
            config: self.config,
            promoter: Arc::new(Promoter {
                short_term,
                target,
                promoted: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
            medium_term,
            long_term,
            worker: Mutex::new(None),
            urgent: Mutex::new(Vec::new()),
            shutdown: Arc::new(ShutdownSignal::default()),
            stopped: AtomicBool::new(false),
        })
    }
}

/// Facade over the three memory tiers.
pub struct MemoryTierManager {
    config: TierConfig,
    promoter: Arc<Promoter>,
    medium_term: Arc<SemanticMemory>,
    long_term: Arc<SemanticMemory>,
    worker: Mutex<Option<PeriodicWorker>>,
    urgent: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<ShutdownSignal>,
    stopped: AtomicBool,
}

impl MemoryTierManager {
    /// Creates a builder.
    #[must_use]
    pub fn builder(config: TierConfig) -> MemoryTierManagerBuilder {
        MemoryTierManagerBuilder::new(config)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    /// Returns the short-term buffer.
    #[must_use]
    pub fn short_term(&self) -> &ShortTermMemory {
        &self.promoter.short_term
    }

    /// Returns the medium-term memory.
    #[must_use]
    pub fn medium_term(&self) -> &Arc<SemanticMemory> {
        &self.medium_term
    }

    /// Returns the long-term memory.
    #[must_use]
    pub fn long_term(&self) -> &Arc<SemanticMemory> {
        &self.long_term
    }

    /// Stores `text` in the tier its `source` routes to.
    ///
    /// Short-term entries at or above `urgent_importance` are scheduled for an
    /// individual promotion after `urgent_delay`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] for empty text and any error
    /// from [`SemanticMemory::add_text`].
    pub fn remember(&self, text: &str, source: &str, importance: f32) -> MemoryResult<Remembered> {
        if text.trim().is_empty() {
            return Err(MemoryError::InvalidRecord("memory text must not be empty"));
        }
        let importance = importance.clamp(0.0, 1.0);
        let tier = self.config.routing.tier_for(source);
        let memory = match tier {
            MemoryTier::ShortTerm => {
                let entry = ShortTermEntry::new(text)
                    .with_source(source)
                    .with_importance(importance);
                let id = self.promoter.short_term.add(entry);
                if importance >= self.config.urgent_importance {
                    self.schedule_urgent(id);
                }
                return Ok(Remembered::ShortTerm(id));
            }
            MemoryTier::MediumTerm => &self.medium_term,
            MemoryTier::LongTerm => &self.long_term,
        };
        let metadata = MemoryMetadata::default().with_importance(importance);
        let outcome = memory.add_text(text, source, metadata)?;
        Ok(Remembered::Stored { tier, outcome })
    }

    fn schedule_urgent(&self, id: EntryId) {
        if self.shutdown.is_triggered() {
            return;
        }
        let promoter = Arc::clone(&self.promoter);
        let shutdown = Arc::clone(&self.shutdown);
        let delay = self.config.urgent_delay();
        let spawned = thread::Builder::new()
            .name("luna-urgent-promotion".into())
            .spawn(move || {
                if shutdown.wait(delay) {
                    return;
                }
                // Failures are logged by the promoter; the batch loop retries.
                let _ = promoter.promote(id);
            });
        match spawned {
            Ok(handle) => {
                let mut urgent = self.urgent.lock();
                urgent.retain(|handle| !handle.is_finished());
                urgent.push(handle);
            }
            Err(err) => {
                warn!(
                    entry = %id,
                    error = %err,
                    "cannot spawn urgent promotion; leaving it to the batch loop"
                );
            }
        }
    }

    /// Promotes one short-term entry into long-term memory.
    ///
    /// Returns `Ok(None)` when the entry is no longer buffered, either
    /// because it expired or because another caller already promoted it.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Promotion`] when the write fails; the entry is
    /// then put back into the buffer.
    pub fn promote_entry(&self, id: EntryId) -> MemoryResult<Option<MemoryId>> {
        self.promoter.promote(id)
    }

    /// Promotes every currently promotable short-term entry.
    pub fn promote_batch(&self) -> PromotionReport {
        self.promoter.promote_batch()
    }

    /// Starts the background promotion loop. Calling it again while running,
    /// or after [`stop`](Self::stop), has no effect.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Io`] when the thread cannot be spawned.
    pub fn start(&self) -> MemoryResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            warn!("memory tier manager already stopped; promotion loop not started");
            return Ok(());
        }
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        let promoter = Arc::clone(&self.promoter);
        *worker = Some(PeriodicWorker::spawn(
            "luna-promotion",
            self.config.promotion_interval(),
            move || {
                promoter.promote_batch();
            },
        )?);
        info!(
            interval_secs = self.config.promotion_interval_secs,
            "memory promotion loop started"
        );
        Ok(())
    }

    /// Returns whether the promotion loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(PeriodicWorker::is_running)
    }

    /// Merges vector hits from the medium- and long-term memories with
    /// keyword matches from short-term memory, best first.
    #[must_use]
    pub fn recall(&self, query: &str, limit: usize) -> Vec<RecallHit> {
        if limit == 0 {
            return Vec::new();
        }
        let floor = self.config.recall_min_similarity;
        let mut hits: Vec<RecallHit> = self
            .promoter
            .short_term
            .search(query, limit)
            .into_iter()
            .map(|entry| RecallHit {
                tier: MemoryTier::ShortTerm,
                id: entry.id.to_string(),
                text: entry.content,
                source: entry.source,
                similarity: 1.0,
            })
            .collect();

        for (tier, memory) in [
            (MemoryTier::MediumTerm, &self.medium_term),
            (MemoryTier::LongTerm, &self.long_term),
        ] {
            hits.extend(
                memory
                    .search_text(query, limit, floor)
                    .into_iter()
                    .map(|hit| RecallHit {
                        tier,
                        id: hit.id.into_string(),
                        text: hit.text,
                        source: hit.source,
                        similarity: hit.similarity,
                    }),
            );
        }

        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(limit);
        hits
    }

    /// Removes medium-term records older than `medium_retention_days` and
    /// expired short-term entries. Long-term memory never decays.
    pub fn decay(&self) -> DecayReport {
        let now = self.promoter.short_term.clock().now();
        let cutoff = now - chrono::Duration::days(i64::from(self.config.medium_retention_days));
        let report = DecayReport {
            medium_term_removed: self.medium_term.store().clear_old(cutoff),
            short_term_expired: self.promoter.short_term.cleanup_expired(),
        };
        if report.medium_term_removed > 0 {
            info!(
                removed = report.medium_term_removed,
                retention_days = self.config.medium_retention_days,
                "decayed medium-term memories"
            );
        }
        report
    }

    /// Returns a snapshot of every tier.
    #[must_use]
    pub fn stats(&self) -> TierStats {
        TierStats {
            short_term: self.promoter.short_term.stats(),
            medium_term: self.medium_term.store().get_stats(),
            long_term: self.long_term.store().get_stats(),
            promoted: self.promoter.promoted.load(Ordering::Relaxed),
            promotion_failures: self.promoter.failed.load(Ordering::Relaxed),
            promotion_loop_running: self.is_running(),
        }
    }

    /// Stops background threads with a bounded wait and flushes both
    /// persisted tiers. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.trigger();
        let timeout = self.config.shutdown_timeout();
        if let Some(mut worker) = self.worker.lock().take() {
            worker.stop(timeout);
        }

        let deadline = Instant::now() + timeout;
        for handle in self.urgent.lock().drain(..) {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(JOIN_POLL);
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!("urgent promotion thread panicked");
                }
            } else {
                warn!("urgent promotion thread did not exit in time; detaching");
            }
        }

        self.medium_term.stop();
        self.long_term.stop();
        info!("memory tier manager stopped");
    }
}

impl Drop for MemoryTierManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for MemoryTierManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTierManager")
            .field("config", &self.config)
            .field("short_term", &self.promoter.short_term)
            .field("medium_term", &self.medium_term)
            .field("long_term", &self.long_term)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::clock::ManualClock;
    use crate::embeddings::{Embedder, HashingEmbedder, SharedEmbedder};
    use crate::semantic::SemanticConfig;
    use crate::store::StoreConfig;
    use std::num::NonZeroUsize;
    use std::sync::atomic::AtomicUsize;

    fn semantic(dir: &tempfile::TempDir, name: &str) -> Arc<SemanticMemory> {
        let model: Arc<dyn Embedder> =
            Arc::new(HashingEmbedder::new(NonZeroUsize::new(64).unwrap()));
        Arc::new(
            SemanticMemory::open(
                StoreConfig::new(dir.path().join(name)).with_autosave(false),
                SemanticConfig::default(),
                CacheConfig::default(),
                Arc::new(SharedEmbedder::ready(model).unwrap()),
            )
            .unwrap(),
        )
    }

    fn manager(dir: &tempfile::TempDir, config: TierConfig) -> MemoryTierManager {
        MemoryTierManager::builder(config)
            .with_medium_term(semantic(dir, "medium.json"))
            .with_long_term(semantic(dir, "long.json"))
            .build()
            .unwrap()
    }

    struct FailingTarget;

    impl PromotionTarget for FailingTarget {
        fn accept(&self, _entry: &ShortTermEntry) -> MemoryResult<MemoryId> {
            Err(MemoryError::promotion("disk full"))
        }
    }

    #[derive(Default)]
    struct CountingTarget {
        accepted: AtomicUsize,
    }

    impl PromotionTarget for CountingTarget {
        fn accept(&self, _entry: &ShortTermEntry) -> MemoryResult<MemoryId> {
            self.accepted.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(2));
            Ok(MemoryId::generate())
        }
    }

    #[test]
    fn routes_by_source() {
        let dir = tempfile::tempdir().unwrap();
        let tiers = manager(&dir, TierConfig::default());

        let fact = tiers.remember("water boils at 100 degrees", "fact", 0.5).unwrap();
        let chat = tiers.remember("we talked about hiking", "conversation", 0.5).unwrap();
        let seen = tiers.remember("a red car passed", "camera", 0.1).unwrap();

        assert_eq!(fact.tier(), MemoryTier::LongTerm);
        assert_eq!(chat.tier(), MemoryTier::MediumTerm);
        assert_eq!(seen.tier(), MemoryTier::ShortTerm);
        assert_eq!(tiers.long_term().store().len(), 1);
        assert_eq!(tiers.medium_term().store().len(), 1);
        assert_eq!(tiers.short_term().len(), 1);
    }

    #[test]
    fn batch_promotes_important_entries() {
        let dir = tempfile::tempdir().unwrap();
        let tiers = manager(&dir, TierConfig::default());
        tiers.remember("my sister lives in Oslo", "chat", 0.8).unwrap();
        tiers.remember("it is cloudy", "chat", 0.2).unwrap();

        let report = tiers.promote_batch();
        assert_eq!(report, PromotionReport { promoted: 1, failed: 0 });
        assert_eq!(tiers.short_term().len(), 1);

        let records = tiers.long_term().store().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text(), "my sister lives in Oslo");
        assert_eq!(records[0].source(), "chat");
        assert_eq!(records[0].metadata().importance, Some(0.8));
        assert_eq!(tiers.stats().promoted, 1);
    }

    #[test]
    fn failed_promotion_keeps_entry() {
        let dir = tempfile::tempdir().unwrap();
        let tiers = MemoryTierManager::builder(TierConfig::default())
            .with_medium_term(semantic(&dir, "medium.json"))
            .with_long_term(semantic(&dir, "long.json"))
            .with_promotion_target(Arc::new(FailingTarget))
            .build()
            .unwrap();

        let Remembered::ShortTerm(id) = tiers.remember("call the bank", "chat", 0.8).unwrap() else {
            panic!("expected a short-term entry");
        };
        assert!(matches!(
            tiers.promote_entry(id),
            Err(MemoryError::Promotion { .. })
        ));
        assert_eq!(tiers.promote_batch(), PromotionReport { promoted: 0, failed: 1 });
        assert!(tiers.short_term().get(id).is_some());

        let stats = tiers.stats();
        assert_eq!(stats.promoted, 0);
        assert_eq!(stats.promotion_failures, 2);
    }

    #[test]
    fn concurrent_promotion_happens_once() {
        let dir = tempfile::tempdir().unwrap();
        let target = Arc::new(CountingTarget::default());
        let tiers = Arc::new(
            MemoryTierManager::builder(TierConfig::default())
                .with_medium_term(semantic(&dir, "medium.json"))
                .with_long_term(semantic(&dir, "long.json"))
                .with_promotion_target(target.clone())
                .build()
                .unwrap(),
        );
        let Remembered::ShortTerm(id) = tiers.remember("urgent note", "chat", 0.8).unwrap() else {
            panic!("expected a short-term entry");
        };

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let tiers = Arc::clone(&tiers);
                thread::spawn(move || {
                    if i % 2 == 0 {
                        usize::from(tiers.promote_entry(id).unwrap().is_some())
                    } else {
                        tiers.promote_batch().promoted
                    }
                })
            })
            .collect();
        let promoted: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();

        assert_eq!(promoted, 1);
        assert_eq!(target.accepted.load(Ordering::SeqCst), 1);
        assert_eq!(tiers.stats().promoted, 1);
        assert!(tiers.short_term().is_empty());
    }

    #[test]
    fn urgent_entries_promote_without_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let tiers = manager(
            &dir,
            TierConfig {
                urgent_delay_ms: 10,
                ..TierConfig::default()
            },
        );
        tiers.remember("the stove is still on", "sensor", 0.95).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while tiers.long_term().store().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(tiers.long_term().store().len(), 1);
        assert!(tiers.short_term().is_empty());
    }

    #[test]
    fn stop_cancels_pending_urgent_promotions() {
        let dir = tempfile::tempdir().unwrap();
        let tiers = manager(
            &dir,
            TierConfig {
                urgent_delay_ms: 60_000,
                ..TierConfig::default()
            },
        );
        tiers.start().unwrap();
        assert!(tiers.is_running());
        tiers.remember("fire alarm test at noon", "sensor", 0.95).unwrap();

        let started = Instant::now();
        tiers.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!tiers.is_running());
        assert!(tiers.long_term().store().is_empty());
        assert_eq!(tiers.short_term().len(), 1);
    }

    #[test]
    fn recall_merges_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let tiers = manager(&dir, TierConfig::default());
        tiers.remember("coffee with milk", "preference", 0.5).unwrap();
        tiers.remember("coffee shop opens at eight", "conversation", 0.5).unwrap();
        tiers.remember("spilled coffee on desk", "camera", 0.1).unwrap();

        let hits = tiers.recall("coffee", 10);
        let tiers_seen: Vec<_> = hits.iter().map(|hit| hit.tier).collect();
        assert_eq!(hits[0].tier, MemoryTier::ShortTerm);
        assert!(tiers_seen.contains(&MemoryTier::MediumTerm));
        assert!(tiers_seen.contains(&MemoryTier::LongTerm));
        assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }

    #[test]
    fn decay_purges_old_medium_term_records() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::default();
        let short_term =
            ShortTermMemory::with_clock(ShortTermConfig::default(), Arc::new(clock.clone()))
                .unwrap();
        let tiers = MemoryTierManager::builder(TierConfig::default())
            .with_short_term(short_term)
            .with_medium_term(semantic(&dir, "medium.json"))
            .with_long_term(semantic(&dir, "long.json"))
            .build()
            .unwrap();

        tiers.remember("we discussed the budget", "summary", 0.5).unwrap();
        tiers.remember("the sky is blue", "fact", 0.5).unwrap();
        tiers.remember("door opened", "sensor", 0.1).unwrap();
        assert_eq!(tiers.decay(), DecayReport::default());

        clock.advance(chrono::Duration::days(31));
        let report = tiers.decay();
        assert_eq!(report.medium_term_removed, 1);
        assert_eq!(report.short_term_expired, 1);
        assert!(tiers.medium_term().store().is_empty());
        assert_eq!(tiers.long_term().store().len(), 1);
    }

    #[test]
    fn builder_requires_persisted_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let err = MemoryTierManager::builder(TierConfig::default())
            .with_long_term(semantic(&dir, "long.json"))
            .build()
            .expect_err("medium tier missing");
        assert!(matches!(err, MemoryError::InvalidConfig(_)));
    }
}
