//! Embedding vectors, the embedder interface, and the shared model handle.

use std::fmt;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::{MemoryError, MemoryResult};

/// Wrapper type around an immutable floating-point embedding.
///
/// All-zero vectors are valid and mean "no usable representation"; their
/// similarity against anything is defined as `0.0`.
#[derive(Clone, PartialEq)]
pub struct EmbeddingVector {
    values: Arc<[f32]>,
}

impl EmbeddingVector {
    /// Creates a new embedding from owned values.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] when the supplied vector is empty
    /// or contains non-finite values.
    pub fn new(values: Vec<f32>) -> MemoryResult<Self> {
        if values.is_empty() {
            return Err(MemoryError::InvalidRecord(
                "embedding vector must not be empty",
            ));
        }
        if !values.iter().all(|value| value.is_finite()) {
            return Err(MemoryError::InvalidRecord(
                "embedding vector contains non-finite values",
            ));
        }
        Ok(Self {
            values: Arc::<[f32]>::from(values.into_boxed_slice()),
        })
    }

    /// Creates an embedding by copying the provided slice.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] if the slice is empty or contains
    /// non-finite values.
    pub fn from_slice(values: &[f32]) -> MemoryResult<Self> {
        Self::new(values.to_vec())
    }

    /// Creates an all-zero embedding of the given dimension.
    #[must_use]
    pub fn zeros(dimension: NonZeroUsize) -> Self {
        Self {
            values: Arc::<[f32]>::from(vec![0.0; dimension.get()].into_boxed_slice()),
        }
    }

    /// Returns an immutable view of the embedding data.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Returns the dimensionality of the embedding.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns whether the embedding is empty. [`EmbeddingVector::new`]
    /// rejects empty inputs, so this only exists for API completeness.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns `true` when every component is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|value| *value == 0.0)
    }

    /// Dot product with another embedding. Extra components of the longer
    /// vector are ignored.
    ///
    /// Accumulates in `f64`; a product too large for `f32` saturates to
    /// infinity.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn dot(&self, other: &Self) -> f32 {
        dot(&self.values, &other.values) as f32
    }

    /// Euclidean (L2) norm, accumulated in `f64`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn norm(&self) -> f32 {
        l2_norm(&self.values) as f32
    }
}

// Squares of finite f32 components can overflow f32, so sums run in f64.
pub(crate) fn dot(lhs: &[f32], rhs: &[f32]) -> f64 {
    lhs.iter()
        .zip(rhs)
        .map(|(a, b)| f64::from(*a) * f64::from(*b))
        .sum()
}

pub(crate) fn l2_norm(values: &[f32]) -> f64 {
    values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>()
        .sqrt()
}

impl TryFrom<Vec<f32>> for EmbeddingVector {
    type Error = MemoryError;

    fn try_from(values: Vec<f32>) -> MemoryResult<Self> {
        Self::new(values)
    }
}

impl fmt::Debug for EmbeddingVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingVector")
            .field("dimensions", &self.len())
            .finish()
    }
}

impl Serialize for EmbeddingVector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.values.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EmbeddingVector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let values = Vec::<f32>::deserialize(deserializer)?;
        Self::new(values).map_err(serde::de::Error::custom)
    }
}

/// Model turning text into fixed-length vectors.
pub trait Embedder: Send + Sync {
    /// Dimension of every vector produced by [`embed`](Self::embed).
    fn dimension(&self) -> usize;

    /// Embeds a single text. Identical input must produce identical output.
    ///
    /// # Errors
    ///
    /// Implementations return any [`MemoryError`] describing a model failure;
    /// [`SharedEmbedder`] turns it into a zero vector.
    fn embed(&self, text: &str) -> MemoryResult<Vec<f32>>;
}

/// Deterministic feature-hashing embedder.
///
/// Lowercased alphanumeric tokens are hashed (FNV-1a) into signed buckets and
/// the result is L2-normalised. Texts that differ only in case, punctuation or
/// whitespace embed identically. Useful offline and in tests; it carries no
/// semantics beyond shared vocabulary.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimension: NonZeroUsize,
}

impl HashingEmbedder {
    /// Creates an embedder producing vectors of `dimension` components.
    #[must_use]
    pub const fn new(dimension: NonZeroUsize) -> Self {
        Self { dimension }
    }
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension.get()
    }

    fn embed(&self, text: &str) -> MemoryResult<Vec<f32>> {
        let dimension = self.dimension.get();
        let mut values = vec![0.0_f32; dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            let hash = fnv1a(&token.to_lowercase());
            #[allow(clippy::cast_possible_truncation)]
            let bucket = (hash % dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            values[bucket] += sign;
        }

        let norm = l2_norm(&values);
        if norm > 0.0 {
            for value in &mut values {
                #[allow(clippy::cast_possible_truncation)]
                let scaled = (f64::from(*value) / norm) as f32;
                *value = scaled;
            }
        }
        Ok(values)
    }
}

fn fnv1a(token: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    token.bytes().fold(OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(PRIME)
    })
}

/// Loader invoked once by [`SharedEmbedder::initialize`].
pub type EmbedderLoader = Box<dyn FnOnce() -> MemoryResult<Arc<dyn Embedder>> + Send>;

/// Load state of a [`SharedEmbedder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderState {
    /// The loader has not run yet.
    Uninitialized,
    /// The loader is running on some thread.
    Loading,
    /// The model is available.
    Ready,
    /// The loader failed; the failure is sticky.
    Failed,
}

struct EmbedderSlot {
    state: EmbedderState,
    loader: Option<EmbedderLoader>,
    model: Option<Arc<dyn Embedder>>,
    failure: Option<String>,
}

/// Process-wide embedding model shared between stores.
///
/// The model is loaded at most once through an explicit
/// [`initialize`](Self::initialize) call; concurrent callers wait for the
/// loading thread instead of loading twice.
pub struct SharedEmbedder {
    dimension: NonZeroUsize,
    slot: Mutex<EmbedderSlot>,
    loaded: Condvar,
}

impl SharedEmbedder {
    /// Creates an uninitialised handle that will run `loader` on first
    /// [`initialize`](Self::initialize).
    pub fn new<F>(dimension: NonZeroUsize, loader: F) -> Self
    where
        F: FnOnce() -> MemoryResult<Arc<dyn Embedder>> + Send + 'static,
    {
        Self {
            dimension,
            slot: Mutex::new(EmbedderSlot {
                state: EmbedderState::Uninitialized,
                loader: Some(Box::new(loader)),
                model: None,
                failure: None,
            }),
            loaded: Condvar::new(),
        }
    }

    /// Wraps an already constructed model; the handle starts [`EmbedderState::Ready`].
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] when the model reports a zero dimension.
    pub fn ready(model: Arc<dyn Embedder>) -> MemoryResult<Self> {
        let dimension = NonZeroUsize::new(model.dimension())
            .ok_or(MemoryError::InvalidConfig("embedder dimension must be non-zero"))?;
        Ok(Self {
            dimension,
            slot: Mutex::new(EmbedderSlot {
                state: EmbedderState::Ready,
                loader: None,
                model: Some(model),
                failure: None,
            }),
            loaded: Condvar::new(),
        })
    }

    /// Returns the dimension of produced vectors.
    #[must_use]
    pub fn dimension(&self) -> NonZeroUsize {
        self.dimension
    }

    /// Returns the current load state.
    #[must_use]
    pub fn state(&self) -> EmbedderState {
        self.slot.lock().state
    }

    /// Returns `true` once the model is ready.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state() == EmbedderState::Ready
    }

    /// Loads the model if needed. Idempotent; callers racing a load block until
    /// it completes and observe its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::ModelLoad`] when the loader failed (now or on an
    /// earlier attempt), panicked, or produced a model of the wrong dimension.
    pub fn initialize(&self) -> MemoryResult<()> {
        let mut slot = self.slot.lock();
        loop {
            match slot.state {
                EmbedderState::Ready => return Ok(()),
                EmbedderState::Failed => {
                    let reason = slot.failure.clone().unwrap_or_default();
                    return Err(MemoryError::model_load(reason));
                }
                EmbedderState::Loading => self.loaded.wait(&mut slot),
                EmbedderState::Uninitialized => break,
            }
        }

        let Some(loader) = slot.loader.take() else {
            slot.state = EmbedderState::Failed;
            slot.failure = Some("no loader configured".to_owned());
            return Err(MemoryError::model_load("no loader configured"));
        };
        slot.state = EmbedderState::Loading;
        drop(slot);

        info!(dimension = self.dimension.get(), "loading embedding model");
        let loaded = panic::catch_unwind(AssertUnwindSafe(loader))
            .unwrap_or_else(|_| Err(MemoryError::model_load("model loader panicked")));
        let outcome = loaded.and_then(|model| {
            if model.dimension() == self.dimension.get() {
                Ok(model)
            } else {
                Err(MemoryError::model_load(format!(
                    "model produces {} dimensions, expected {}",
                    model.dimension(),
                    self.dimension
                )))
            }
        });

        let mut slot = self.slot.lock();
        let result = match outcome {
            Ok(model) => {
                slot.model = Some(model);
                slot.state = EmbedderState::Ready;
                info!("embedding model ready");
                Ok(())
            }
            Err(err) => {
                warn!(%err, "embedding model failed to load");
                slot.failure = Some(err.to_string());
                slot.state = EmbedderState::Failed;
                Err(err)
            }
        };
        self.loaded.notify_all();
        result
    }

    /// Embeds `text` with the loaded model.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::EmbedderNotReady`] before the model is loaded,
    /// [`MemoryError::DimensionMismatch`] for output of the wrong length, and
    /// any error the model reports.
    pub fn try_embed(&self, text: &str) -> MemoryResult<EmbeddingVector> {
        let model = self
            .slot
            .lock()
            .model
            .clone()
            .ok_or(MemoryError::EmbedderNotReady)?;
        let values = model.embed(text)?;
        if values.len() != self.dimension.get() {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimension.get(),
                actual: values.len(),
            });
        }
        EmbeddingVector::new(values)
    }

    /// Embeds `text`, never failing: an unready model, a model error, or a
    /// malformed output all yield a zero vector.
    #[must_use]
    pub fn embed(&self, text: &str) -> EmbeddingVector {
        match self.try_embed(text) {
            Ok(vector) => vector,
            Err(MemoryError::EmbedderNotReady) => {
                debug!("embedding requested before model initialisation");
                EmbeddingVector::zeros(self.dimension)
            }
            Err(err) => {
                warn!(%err, "embedding failed; using zero vector");
                EmbeddingVector::zeros(self.dimension)
            }
        }
    }
}

impl fmt::Debug for SharedEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedEmbedder")
            .field("dimension", &self.dimension)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
