//! Vector store combining the persisted record list with its similarity index.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use luna_primitives::MemoryId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::embeddings::EmbeddingVector;
use crate::index::{SearchHit, VectorIndex};
use crate::record::{MemoryMetadata, MemoryRecord};
use crate::storage::VectorStorage;
use crate::worker::PeriodicWorker;
use crate::{MemoryError, MemoryResult};

/// Configuration for a single persisted store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file holding the records.
    pub path: PathBuf,
    /// Fixed vector dimension; inferred from the first record when absent.
    pub dimension: Option<usize>,
    /// Whether a background thread flushes dirty state periodically.
    pub autosave: bool,
    /// Seconds between background flushes.
    pub flush_interval_secs: u64,
    /// Milliseconds to wait for the background thread on shutdown.
    pub shutdown_timeout_ms: u64,
}

impl StoreConfig {
    /// Creates a configuration persisting to `path` with default timings.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Fixes the vector dimension.
    #[must_use]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    /// Enables or disables the background flush thread.
    #[must_use]
    pub fn with_autosave(mut self, autosave: bool) -> Self {
        self.autosave = autosave;
        self
    }

    /// Sets the background flush interval in seconds.
    #[must_use]
    pub fn with_flush_interval_secs(mut self, secs: u64) -> Self {
        self.flush_interval_secs = secs;
        self
    }

    /// Returns the background flush interval.
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// Returns the shutdown join timeout.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] for an empty path, a zero
    /// dimension, or a zero flush interval with autosave enabled.
    pub fn validate(&self) -> MemoryResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(MemoryError::InvalidConfig("store path must not be empty"));
        }
        if self.dimension == Some(0) {
            return Err(MemoryError::InvalidConfig(
                "store dimension must be greater than zero",
            ));
        }
        if self.autosave && self.flush_interval_secs == 0 {
            return Err(MemoryError::InvalidConfig(
                "flush interval must be greater than zero when autosave is enabled",
            ));
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("memories.json"),
            dimension: None,
            autosave: true,
            flush_interval_secs: 30,
            shutdown_timeout_ms: 2_000,
        }
    }
}

/// Snapshot of a store's size and persistence state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Number of records.
    pub records: usize,
    /// `(rows, dimension)` of the index matrix.
    pub matrix_shape: (usize, usize),
    /// Whether the index currently holds any rows.
    pub has_index: bool,
    /// Whether unsaved changes are waiting for a flush.
    pub pending_flush: bool,
}

struct StoreState {
    storage: VectorStorage,
    index: VectorIndex,
}

impl StoreState {
    fn check_consistency(&self) {
        debug_assert_eq!(self.storage.len(), self.index.rows());
    }
}

/// Thread-safe vector store.
///
/// One lock guards both the record list and the index, so a search never
/// observes them at different lengths. Search is brute force; see
/// [`VectorIndex`].
pub struct VectorStore {
    config: StoreConfig,
    state: Arc<Mutex<StoreState>>,
    autosave: Mutex<Option<PeriodicWorker>>,
    stopped: AtomicBool,
}

impl VectorStore {
    /// Opens the store at `config.path`, loading whatever records are there.
    ///
    /// A missing or corrupt file starts an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] for an invalid configuration and
    /// [`MemoryError::Io`] when the background thread cannot be spawned.
    pub fn open(config: StoreConfig) -> MemoryResult<Self> {
        config.validate()?;

        let storage = VectorStorage::load(&config.path, config.dimension);
        let mut index = VectorIndex::new(storage.dimension().unwrap_or(0));
        index.rebuild(storage.records());
        let state = Arc::new(Mutex::new(StoreState { storage, index }));

        let autosave = if config.autosave {
            let shared = Arc::clone(&state);
            let path = config.path.clone();
            let worker = PeriodicWorker::spawn(
                format!("luna-autosave-{}", file_label(&path)),
                config.flush_interval(),
                move || {
                    let mut state = shared.lock();
                    if let Err(err) = state.storage.flush(false) {
                        warn!(path = %path.display(), %err, "periodic flush failed; will retry");
                    }
                },
            )?;
            Some(worker)
        } else {
            None
        };

        Ok(Self {
            config,
            state,
            autosave: Mutex::new(autosave),
            stopped: AtomicBool::new(false),
        })
    }

    /// Returns the configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the file the store persists to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Returns the vector dimension, once known.
    #[must_use]
    pub fn dimension(&self) -> Option<usize> {
        self.state.lock().storage.dimension()
    }

    /// Creates and stores a record.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] for empty text or a duplicate id
    /// and [`MemoryError::DimensionMismatch`] for a vector of the wrong length.
    pub fn add(
        &self,
        id: MemoryId,
        text: impl Into<String>,
        vector: EmbeddingVector,
        source: impl Into<String>,
        metadata: MemoryMetadata,
    ) -> MemoryResult<MemoryRecord> {
        let record = MemoryRecord::builder(text, vector)
            .id(id)
            .source(source)
            .metadata(metadata)
            .build()?;
        self.add_record(record.clone())?;
        Ok(record)
    }

    /// Stores a prebuilt record.
    ///
    /// # Errors
    ///
    /// Same conditions as [`add`](Self::add).
    pub fn add_record(&self, record: MemoryRecord) -> MemoryResult<()> {
        let mut state = self.state.lock();
        if state.storage.get(record.id()).is_some() {
            return Err(MemoryError::InvalidRecord("memory id already exists"));
        }
        let vector = record.vector().clone();
        state.storage.add_memory(record)?;
        state.index.add_vector(&vector);
        state.check_consistency();
        Ok(())
    }

    /// Returns the `limit` records most similar to `query`.
    #[must_use]
    pub fn search(&self, query: &EmbeddingVector, limit: usize) -> Vec<SearchHit> {
        let state = self.state.lock();
        state.index.search(query, state.storage.records(), limit)
    }

    /// Deletes a record and rebuilds the index. Costs O(N·dim).
    pub fn delete(&self, id: &MemoryId) -> bool {
        let mut state = self.state.lock();
        if !state.storage.delete_memory(id) {
            return false;
        }
        let StoreState { storage, index } = &mut *state;
        index.rebuild(storage.records());
        state.check_consistency();
        debug!(%id, "memory deleted");
        true
    }

    /// Increments the record's `frequency` counter.
    pub fn increment_frequency(&self, id: &MemoryId) -> bool {
        self.state.lock().storage.increment_frequency(id)
    }

    /// Returns a copy of the record with `id`.
    #[must_use]
    pub fn get(&self, id: &MemoryId) -> Option<MemoryRecord> {
        self.state.lock().storage.get(id).cloned()
    }

    /// Returns a copy of every record in insertion order.
    #[must_use]
    pub fn records(&self) -> Vec<MemoryRecord> {
        self.state.lock().storage.records().to_vec()
    }

    /// Returns records created within `start..=end`.
    #[must_use]
    pub fn get_by_date_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<MemoryRecord> {
        self.state.lock().storage.get_by_date_range(start, end)
    }

    /// Removes records created before `before`, rebuilding the index only if
    /// something was removed.
    pub fn clear_old(&self, before: DateTime<Utc>) -> usize {
        let mut state = self.state.lock();
        let removed = state.storage.clear_old(before);
        if removed > 0 {
            let StoreState { storage, index } = &mut *state;
            index.rebuild(storage.records());
            info!(removed, before = %before, "purged old memories");
        }
        state.check_consistency();
        removed
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().storage.len()
    }

    /// Returns whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns size and persistence statistics.
    #[must_use]
    pub fn get_stats(&self) -> StoreStats {
        let state = self.state.lock();
        StoreStats {
            records: state.storage.len(),
            matrix_shape: state.index.shape(),
            has_index: state.index.is_built(),
            pending_flush: state.storage.is_dirty(),
        }
    }

    /// Writes pending changes now (or unconditionally with `force`).
    ///
    /// Returns whether a write happened. Failures are logged and leave the
    /// store dirty for the next attempt.
    pub fn flush(&self, force: bool) -> bool {
        let mut state = self.state.lock();
        match state.storage.flush(force) {
            Ok(written) => written,
            Err(err) => {
                warn!(
                    path = %self.config.path.display(),
                    %err,
                    "flush failed; in-memory state retained"
                );
                false
            }
        }
    }

    /// Stops the background flush thread and writes any unflushed changes.
    /// An untouched store leaves its file alone, so records skipped while
    /// loading survive on disk. Later calls are no-ops.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(mut worker) = self.autosave.lock().take() {
            worker.stop(self.config.shutdown_timeout());
        }
        self.flush(false);
        debug!(path = %self.config.path.display(), "vector store stopped");
    }
}

impl Drop for VectorStore {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorStore")
            .field("path", &self.config.path)
            .field("stats", &self.get_stats())
            .finish_non_exhaustive()
    }
}

fn file_label(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| "store".to_owned(), |stem| stem.to_string_lossy().into_owned())
}
