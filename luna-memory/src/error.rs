//! Error types for the memory subsystem.

use std::path::PathBuf;

use serde_json::Error as SerdeError;
use thiserror::Error;

/// Errors emitted by memory components.
///
/// Conditions the stores recover from locally (unreadable files, failed
/// flushes, embedding failures, unknown ids, malformed timestamps) are logged
/// rather than returned; these variants cover what a caller must act on.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The provided configuration was invalid.
    #[error("invalid memory configuration: {0}")]
    InvalidConfig(&'static str),
    /// Underlying I/O failure outside of store persistence.
    #[error("i/o error: {source}")]
    Io {
        /// Source [`std::io::Error`].
        #[from]
        source: std::io::Error,
    },
    /// Serialization or deserialization error.
    #[error("serialization error: {source}")]
    Serialization {
        /// Source [`serde_json::Error`].
        #[from]
        source: SerdeError,
    },
    /// Memory record failed validation.
    #[error("invalid memory record: {0}")]
    InvalidRecord(&'static str),
    /// A vector did not match the dimension fixed for the store.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension fixed for the store.
        expected: usize,
        /// Dimension of the rejected vector.
        actual: usize,
    },
    /// The embedding model could not be loaded at all.
    #[error("cannot load embedding model: {reason}")]
    ModelLoad {
        /// Human-readable reason describing the failure.
        reason: String,
    },
    /// A store snapshot could not be written to disk.
    #[error("cannot write memory store {}: {source}", path.display())]
    Persist {
        /// Destination path of the snapshot.
        path: PathBuf,
        /// Source [`std::io::Error`].
        source: std::io::Error,
    },
    /// An embedding was requested before the model finished initialising.
    #[error("embedding model not initialised")]
    EmbedderNotReady,
    /// A promotion target rejected an entry.
    #[error("promotion failed: {reason}")]
    Promotion {
        /// Human-readable reason describing the failure.
        reason: String,
    },
}

impl MemoryError {
    /// Helper to construct model loading errors from string-like values.
    #[must_use]
    pub fn model_load(reason: impl Into<String>) -> Self {
        Self::ModelLoad {
            reason: reason.into(),
        }
    }

    /// Helper to construct promotion errors from string-like values.
    #[must_use]
    pub fn promotion(reason: impl Into<String>) -> Self {
        Self::Promotion {
            reason: reason.into(),
        }
    }
}

/// Result type alias for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
