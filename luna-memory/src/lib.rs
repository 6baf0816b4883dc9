//! Layered memory for the Luna assistant.
//!
//! The crate provides an LRU embedding cache, a brute-force cosine index, a
//! JSON-persisted vector store with background auto-save, and a tier manager
//! that promotes short-term observations into long-term memory. All
//! background work runs on OS threads; every public API is synchronous.

#![warn(missing_docs, clippy::pedantic)]

mod cache;
mod categorize;
mod clock;
mod config;
mod embeddings;
mod error;
mod index;
mod record;
mod registry;
mod semantic;
mod short_term;
mod storage;
mod store;
mod tiers;
mod worker;

/// LRU embedding cache with time-based expiry.
pub use cache::{CacheConfig, EmbeddingCache};
/// Keyword categorisation and emotion tagging.
pub use categorize::{MemoryCategory, categorize, detect_emotions};
/// Injectable time sources.
pub use clock::{Clock, ManualClock, SharedClock, SystemClock, system_clock};
/// Aggregate configuration loaded from JSON.
pub use config::MemoryConfig;
/// Embedding vectors and the shared embedding model.
pub use embeddings::{
    Embedder, EmbedderLoader, EmbedderState, EmbeddingVector, HashingEmbedder, SharedEmbedder,
};
/// Error type and result alias for memory operations.
pub use error::{MemoryError, MemoryResult};
/// Brute-force cosine similarity index.
pub use index::{SearchHit, VectorIndex};
/// Persisted memory records.
pub use record::{
    MemoryMetadata, MemoryRecord, MemoryRecordBuilder, format_timestamp, parse_timestamp,
};
/// Per-entity memories sharing one embedder.
pub use registry::MemoryRegistry;
/// Text-level memory with de-duplication.
pub use semantic::{AddOutcome, SemanticConfig, SemanticMemory};
/// TTL-bound short-term buffer.
pub use short_term::{ShortTermConfig, ShortTermEntry, ShortTermMemory, ShortTermStats};
/// Record list persisted as a JSON document.
pub use storage::VectorStorage;
/// Storage and index kept consistent under one lock.
pub use store::{StoreConfig, StoreStats, VectorStore};
/// Tier routing, promotion and decay.
pub use tiers::{
    DecayReport, MemoryTierManager, MemoryTierManagerBuilder, PromotionReport, PromotionTarget,
    RecallHit, Remembered, TierConfig, TierStats,
};
/// Stoppable interval threads.
pub use worker::PeriodicWorker;

pub use luna_primitives::{EntryId, MemoryId, MemoryTier, TierRouting};
