//! Per-entity semantic memories sharing one embedding model.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::cache::CacheConfig;
use crate::embeddings::SharedEmbedder;
use crate::semantic::{SemanticConfig, SemanticMemory};
use crate::store::StoreConfig;
use crate::{MemoryError, MemoryResult};

/// Lazily opens one [`SemanticMemory`] per entity under a base directory.
///
/// Every memory opened through the registry shares the same
/// [`SharedEmbedder`], so the model is loaded once per process.
pub struct MemoryRegistry {
    base_dir: PathBuf,
    embedder: Arc<SharedEmbedder>,
    store_template: StoreConfig,
    semantic: SemanticConfig,
    cache: CacheConfig,
    memories: Mutex<HashMap<String, Arc<SemanticMemory>>>,
}

impl MemoryRegistry {
    /// Creates a registry using default store, cache and dedup settings.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>, embedder: Arc<SharedEmbedder>) -> Self {
        Self {
            base_dir: base_dir.into(),
            embedder,
            store_template: StoreConfig::default(),
            semantic: SemanticConfig::default(),
            cache: CacheConfig::default(),
            memories: Mutex::new(HashMap::new()),
        }
    }

    /// Uses `template` for every store; its `path` is replaced per entity.
    #[must_use]
    pub fn with_store_template(mut self, template: StoreConfig) -> Self {
        self.store_template = template;
        self
    }

    /// Sets the de-duplication settings for newly opened memories.
    #[must_use]
    pub fn with_semantic_config(mut self, config: SemanticConfig) -> Self {
        self.semantic = config;
        self
    }

    /// Sets the embedding cache settings for newly opened memories.
    #[must_use]
    pub fn with_cache_config(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Returns the directory holding the entity files.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns the shared embedder.
    #[must_use]
    pub fn embedder(&self) -> &Arc<SharedEmbedder> {
        &self.embedder
    }

    /// Returns the memory for `entity`, opening `<base_dir>/<entity>.json`
    /// on first use.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] for entity names that are not
    /// plain file stems, and any error from [`SemanticMemory::open`].
    pub fn store_for(&self, entity: &str) -> MemoryResult<Arc<SemanticMemory>> {
        validate_entity(entity)?;
        let mut memories = self.memories.lock();
        if let Some(memory) = memories.get(entity) {
            return Ok(Arc::clone(memory));
        }

        let mut store_config = self.store_template.clone();
        store_config.path = self.base_dir.join(format!("{entity}.json"));
        debug!(entity, path = %store_config.path.display(), "opening entity memory");
        let memory = Arc::new(SemanticMemory::open(
            store_config,
            self.semantic,
            self.cache,
            Arc::clone(&self.embedder),
        )?);
        memories.insert(entity.to_owned(), Arc::clone(&memory));
        Ok(memory)
    }

    /// Names of the entities opened so far, sorted.
    #[must_use]
    pub fn entities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.memories.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stops and forgets every opened memory, flushing pending changes.
    pub fn shutdown(&self) {
        let memories: Vec<_> = self.memories.lock().drain().collect();
        for (_, memory) in &memories {
            memory.stop();
        }
        info!(stores = memories.len(), "memory registry shut down");
    }
}

impl fmt::Debug for MemoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRegistry")
            .field("base_dir", &self.base_dir)
            .field("entities", &self.entities())
            .finish_non_exhaustive()
    }
}

fn validate_entity(entity: &str) -> MemoryResult<()> {
    let valid = !entity.is_empty()
        && !entity.starts_with('.')
        && entity
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(MemoryError::InvalidConfig(
            "entity names may only contain ASCII letters, digits, '-', '_' and '.'",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{Embedder, HashingEmbedder};
    use crate::record::MemoryMetadata;
    use std::num::NonZeroUsize;

    fn registry(dir: &tempfile::TempDir) -> MemoryRegistry {
        let model: Arc<dyn Embedder> =
            Arc::new(HashingEmbedder::new(NonZeroUsize::new(32).unwrap()));
        MemoryRegistry::new(
            dir.path().join("entities"),
            Arc::new(SharedEmbedder::ready(model).unwrap()),
        )
        .with_store_template(StoreConfig::default().with_autosave(false))
    }

    #[test]
    fn reuses_open_memories() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir);
        let first = registry.store_for("alice").unwrap();
        let again = registry.store_for("alice").unwrap();
        let other = registry.store_for("bob").unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert!(Arc::ptr_eq(first.embedder(), other.embedder()));
        assert_eq!(registry.entities(), ["alice", "bob"]);
    }

    #[test]
    fn rejects_path_like_entities() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir);
        for entity in ["", "../escape", "a/b", ".hidden"] {
            assert!(
                matches!(registry.store_for(entity), Err(MemoryError::InvalidConfig(_))),
                "{entity:?} should be rejected"
            );
        }
    }

    #[test]
    fn shutdown_flushes_every_memory() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir);
        registry
            .store_for("carol")
            .unwrap()
            .add_text("carol likes chess", "fact", MemoryMetadata::default())
            .unwrap();
        registry.shutdown();

        assert!(registry.entities().is_empty());
        assert!(dir.path().join("entities").join("carol.json").exists());
    }
}
