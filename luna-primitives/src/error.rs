//! Shared error definitions for memory primitives.

use thiserror::Error;
use uuid::Error as UuidError;

/// Result alias used by the primitive types.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while parsing primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// The provided short-term entry identifier could not be parsed.
    #[error("invalid entry id: {source}")]
    InvalidEntryId {
        /// Source parsing error from the UUID library.
        #[from]
        source: UuidError,
    },

    /// Memory identifier failed validation.
    #[error("invalid memory id `{id}`: {reason}")]
    InvalidMemoryId {
        /// The offending identifier string.
        id: String,
        /// Human-readable reason for rejection.
        reason: &'static str,
    },

    /// Tier label did not name a known tier.
    #[error("unknown memory tier `{0}`")]
    UnknownTier(String),
}
