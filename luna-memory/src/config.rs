//! Aggregate configuration for a complete memory stack.

use std::fs::File;
use std::io::BufReader;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::embeddings::SharedEmbedder;
use crate::registry::MemoryRegistry;
use crate::semantic::{SemanticConfig, SemanticMemory};
use crate::short_term::{ShortTermConfig, ShortTermMemory};
use crate::store::StoreConfig;
use crate::tiers::{MemoryTierManager, TierConfig};
use crate::{MemoryError, MemoryResult};

/// Settings for every memory component, loadable from one JSON document.
///
/// Missing sections and fields fall back to their defaults:
///
/// ```json
/// {
///   "data_dir": "data/memory",
///   "embedding_dimension": 384,
///   "store": { "flush_interval_secs": 10 },
///   "short_term": { "ttl_secs": 600 },
///   "tiers": { "routing": { "long_term_sources": ["fact", "profile"] } }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Directory holding every store file.
    pub data_dir: PathBuf,
    /// Output dimension of the embedding model.
    pub embedding_dimension: usize,
    /// Template for each store; `path` is replaced per store.
    pub store: StoreConfig,
    /// Embedding cache settings.
    pub cache: CacheConfig,
    /// De-duplication settings.
    pub semantic: SemanticConfig,
    /// Short-term buffer settings.
    pub short_term: ShortTermConfig,
    /// Tier routing and promotion settings.
    pub tiers: TierConfig,
}

impl MemoryConfig {
    /// Reads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Io`] when the file cannot be opened,
    /// [`MemoryError::Serialization`] for malformed JSON and
    /// [`MemoryError::InvalidConfig`] when validation fails.
    pub fn from_json_file(path: impl AsRef<Path>) -> MemoryResult<Self> {
        let file = File::open(path.as_ref())?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Serialization`] for malformed JSON and
    /// [`MemoryError::InvalidConfig`] when validation fails.
    pub fn from_json_str(json: &str) -> MemoryResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`MemoryError::InvalidConfig`] found.
    pub fn validate(&self) -> MemoryResult<()> {
        self.dimension()?;
        if let Some(fixed) = self.store.dimension {
            if fixed != self.embedding_dimension {
                return Err(MemoryError::InvalidConfig(
                    "store dimension disagrees with the embedding dimension",
                ));
            }
        }
        self.store.validate()?;
        self.cache.validate()?;
        self.semantic.validate()?;
        self.short_term.validate()?;
        self.tiers.validate()
    }

    /// Returns the embedding dimension.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] when it is zero.
    pub fn dimension(&self) -> MemoryResult<NonZeroUsize> {
        NonZeroUsize::new(self.embedding_dimension).ok_or(MemoryError::InvalidConfig(
            "embedding dimension must be greater than zero",
        ))
    }

    /// Store configuration for `<data_dir>/<name>.json`.
    #[must_use]
    pub fn store_config(&self, name: &str) -> StoreConfig {
        let mut config = self.store.clone();
        config.path = self.data_dir.join(format!("{name}.json"));
        config
    }

    /// Opens the semantic memory stored under `<data_dir>/<name>.json`.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`SemanticMemory::open`].
    pub fn open_semantic(
        &self,
        name: &str,
        embedder: Arc<SharedEmbedder>,
    ) -> MemoryResult<SemanticMemory> {
        SemanticMemory::open(self.store_config(name), self.semantic, self.cache, embedder)
    }

    /// Builds the three-tier manager over `medium_term.json` and
    /// `long_term.json`. The promotion loop is not started.
    ///
    /// # Errors
    ///
    /// Propagates errors from opening either store or building the manager.
    pub fn open_tiers(&self, embedder: &Arc<SharedEmbedder>) -> MemoryResult<MemoryTierManager> {
        let medium_term = self.open_semantic("medium_term", Arc::clone(embedder))?;
        let long_term = self.open_semantic("long_term", Arc::clone(embedder))?;
        MemoryTierManager::builder(self.tiers.clone())
            .with_short_term(ShortTermMemory::new(self.short_term)?)
            .with_medium_term(Arc::new(medium_term))
            .with_long_term(Arc::new(long_term))
            .build()
    }

    /// Builds a per-entity registry rooted at `<data_dir>/entities`.
    #[must_use]
    pub fn registry(&self, embedder: Arc<SharedEmbedder>) -> MemoryRegistry {
        MemoryRegistry::new(self.data_dir.join("entities"), embedder)
            .with_store_template(self.store.clone())
            .with_semantic_config(self.semantic)
            .with_cache_config(self.cache)
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("memory"),
            embedding_dimension: 384,
            store: StoreConfig::default(),
            cache: CacheConfig::default(),
            semantic: SemanticConfig::default(),
            short_term: ShortTermConfig::default(),
            tiers: TierConfig::default(),
        }
    }
}
