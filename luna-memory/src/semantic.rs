//! Text-level memory: embedding, caching, de-duplication and search.

use std::fmt;
use std::sync::Arc;

use luna_primitives::MemoryId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{CacheConfig, EmbeddingCache};
use crate::categorize::{categorize, detect_emotions};
use crate::embeddings::{EmbeddingVector, SharedEmbedder};
use crate::index::SearchHit;
use crate::record::MemoryMetadata;
use crate::store::{StoreConfig, VectorStore};
use crate::{MemoryError, MemoryResult};

/// Behaviour of a [`SemanticMemory`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    /// Similarity at or above which a new text counts as a duplicate.
    pub dedup_threshold: f32,
    /// Whether missing categories and emotion tags are filled in on insert.
    pub auto_categorize: bool,
}

impl SemanticConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] when the threshold is outside `(0, 1]`.
    pub fn validate(self) -> MemoryResult<()> {
        if !(self.dedup_threshold > 0.0 && self.dedup_threshold <= 1.0) {
            return Err(MemoryError::InvalidConfig(
                "dedup threshold must be within (0, 1]",
            ));
        }
        Ok(())
    }
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            dedup_threshold: 0.92,
            auto_categorize: true,
        }
    }
}

/// Result of [`SemanticMemory::add_text`].
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    /// A new record was stored.
    Inserted(MemoryId),
    /// The text duplicated an existing record, whose frequency was bumped.
    Merged {
        /// Identifier of the existing record.
        id: MemoryId,
        /// Similarity between the new text and the existing record.
        similarity: f32,
    },
}

impl AddOutcome {
    /// Identifier of the record now holding the text.
    #[must_use]
    pub fn id(&self) -> &MemoryId {
        match self {
            Self::Inserted(id) | Self::Merged { id, .. } => id,
        }
    }

    /// Returns `true` when the text was folded into an existing record.
    #[must_use]
    pub fn is_merged(&self) -> bool {
        matches!(self, Self::Merged { .. })
    }
}

/// Vector store addressed by text.
///
/// Embeddings come from the shared model through a per-memory LRU cache. An
/// insert whose nearest neighbour is at least `dedup_threshold` similar
/// increments that neighbour's `frequency` instead of adding a record.
pub struct SemanticMemory {
    store: VectorStore,
    embedder: Arc<SharedEmbedder>,
    cache: Mutex<EmbeddingCache>,
    config: SemanticConfig,
    writes: Mutex<()>,
}

impl SemanticMemory {
    /// Opens the backing store and wires it to `embedder`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] for invalid configuration or a
    /// store dimension that disagrees with the embedder, and any error from
    /// [`VectorStore::open`].
    pub fn open(
        store_config: StoreConfig,
        config: SemanticConfig,
        cache_config: CacheConfig,
        embedder: Arc<SharedEmbedder>,
    ) -> MemoryResult<Self> {
        config.validate()?;
        let dimension = embedder.dimension().get();
        let store_config = match store_config.dimension {
            None => store_config.with_dimension(dimension),
            Some(fixed) if fixed == dimension => store_config,
            Some(_) => {
                return Err(MemoryError::InvalidConfig(
                    "store dimension disagrees with the embedding model",
                ));
            }
        };

        Ok(Self {
            store: VectorStore::open(store_config)?,
            embedder,
            cache: Mutex::new(EmbeddingCache::new(cache_config)?),
            config,
            writes: Mutex::new(()),
        })
    }

    /// Returns the underlying vector store.
    #[must_use]
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Returns the shared embedder.
    #[must_use]
    pub fn embedder(&self) -> &Arc<SharedEmbedder> {
        &self.embedder
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> SemanticConfig {
        self.config
    }

    /// Embeds `text`, consulting the cache first. Zero vectors (failed
    /// embeddings) are not cached.
    #[must_use]
    pub fn embed(&self, text: &str) -> EmbeddingVector {
        if let Some(vector) = self.cache.lock().get(text) {
            return vector;
        }
        let vector = self.embedder.embed(text);
        if !vector.is_zero() {
            self.cache.lock().set(text, vector.clone());
        }
        vector
    }

    /// Stores `text`, or folds it into a near-duplicate.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] for empty text and any error
    /// from [`VectorStore::add`].
    pub fn add_text(
        &self,
        text: &str,
        source: &str,
        mut metadata: MemoryMetadata,
    ) -> MemoryResult<AddOutcome> {
        if text.trim().is_empty() {
            return Err(MemoryError::InvalidRecord("memory text must not be empty"));
        }
        let vector = self.embed(text);

        // Check-then-insert must not interleave with another writer.
        let _writes = self.writes.lock();
        if !vector.is_zero() {
            if let Some(best) = self.store.search(&vector, 1).into_iter().next() {
                if best.similarity >= self.config.dedup_threshold
                    && self.store.increment_frequency(&best.id)
                {
                    debug!(id = %best.id, similarity = best.similarity, "merged duplicate memory");
                    return Ok(AddOutcome::Merged {
                        id: best.id,
                        similarity: best.similarity,
                    });
                }
            }
        }

        metadata.frequency = metadata.frequency.max(1);
        if self.config.auto_categorize {
            if metadata.category.is_none() {
                metadata.category = Some(categorize(text).as_str().to_owned());
            }
            if metadata.emotions.is_empty() {
                metadata.emotions = detect_emotions(text);
            }
        }

        let record = self
            .store
            .add(MemoryId::generate(), text, vector, source, metadata)?;
        debug!(id = %record.id(), source, "stored memory");
        Ok(AddOutcome::Inserted(record.id().clone()))
    }

    /// Returns up to `limit` records at least `min_similarity` similar to `query`.
    #[must_use]
    pub fn search_text(&self, query: &str, limit: usize, min_similarity: f32) -> Vec<SearchHit> {
        let vector = self.embed(query);
        let mut hits = self.store.search(&vector, limit);
        hits.retain(|hit| hit.similarity >= min_similarity);
        hits
    }

    /// Stops the backing store, flushing pending changes.
    pub fn stop(&self) {
        self.store.stop();
    }
}

impl fmt::Debug for SemanticMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemanticMemory")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{Embedder, HashingEmbedder};
    use std::num::NonZeroUsize;

    fn memory(dir: &tempfile::TempDir) -> SemanticMemory {
        let model: Arc<dyn Embedder> =
            Arc::new(HashingEmbedder::new(NonZeroUsize::new(64).unwrap()));
        let embedder = Arc::new(SharedEmbedder::ready(model).unwrap());
        SemanticMemory::open(
            StoreConfig::new(dir.path().join("semantic.json")).with_autosave(false),
            SemanticConfig::default(),
            CacheConfig::default(),
            embedder,
        )
        .unwrap()
    }

    #[test]
    fn duplicates_bump_frequency() {
        let dir = tempfile::tempdir().unwrap();
        let memory = memory(&dir);

        let first = memory
            .add_text("I love green tea", "preference", MemoryMetadata::default())
            .unwrap();
        let second = memory
            .add_text("i love GREEN tea!", "preference", MemoryMetadata::default())
            .unwrap();

        assert!(!first.is_merged());
        assert!(second.is_merged());
        assert_eq!(first.id(), second.id());
        assert_eq!(memory.store().len(), 1);
        let record = memory.store().get(first.id()).unwrap();
        assert_eq!(record.metadata().frequency, 2);
        assert_eq!(record.metadata().category.as_deref(), Some("preference"));
    }

    #[test]
    fn distinct_texts_are_kept_apart() {
        let dir = tempfile::tempdir().unwrap();
        let memory = memory(&dir);
        memory
            .add_text("the cat sleeps on the sofa", "conversation", MemoryMetadata::default())
            .unwrap();
        memory
            .add_text(
                "quarterly tax deadline is in april",
                "conversation",
                MemoryMetadata::default(),
            )
            .unwrap();
        assert_eq!(memory.store().len(), 2);

        let hits = memory.search_text("where does the cat sleep", 5, 0.1);
        assert_eq!(hits[0].text, "the cat sleeps on the sofa");
        assert!(hits.iter().all(|hit| hit.similarity >= 0.1));
    }

    #[test]
    fn caller_category_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let memory = memory(&dir);
        let outcome = memory
            .add_text(
                "I am so happy today",
                "journal",
                MemoryMetadata::default().with_category("diary"),
            )
            .unwrap();
        let record = memory.store().get(outcome.id()).unwrap();
        assert_eq!(record.metadata().category.as_deref(), Some("diary"));
        assert_eq!(record.metadata().emotions, ["joy"]);
    }

    #[test]
    fn rejects_mismatched_store_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let model: Arc<dyn Embedder> =
            Arc::new(HashingEmbedder::new(NonZeroUsize::new(8).unwrap()));
        let embedder = Arc::new(SharedEmbedder::ready(model).unwrap());
        let err = SemanticMemory::open(
            StoreConfig::new(dir.path().join("x.json"))
                .with_dimension(16)
                .with_autosave(false),
            SemanticConfig::default(),
            CacheConfig::default(),
            embedder,
        )
        .expect_err("dimension mismatch");
        assert!(matches!(err, MemoryError::InvalidConfig(_)));
    }

    #[test]
    fn unready_embedder_still_stores_but_never_merges() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(SharedEmbedder::new(NonZeroUsize::new(8).unwrap(), || {
            Err(MemoryError::model_load("offline"))
        }));
        let memory = SemanticMemory::open(
            StoreConfig::new(dir.path().join("zero.json")).with_autosave(false),
            SemanticConfig::default(),
            CacheConfig::default(),
            embedder,
        )
        .unwrap();

        memory.add_text("alpha", "fact", MemoryMetadata::default()).unwrap();
        memory.add_text("alpha", "fact", MemoryMetadata::default()).unwrap();
        assert_eq!(memory.store().len(), 2);
        assert!(memory.search_text("alpha", 5, -1.0).is_empty());
    }
}
