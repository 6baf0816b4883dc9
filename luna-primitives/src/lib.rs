//! Core shared types for the Luna memory subsystem.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod ids;
mod tier;

/// Error type and result alias shared across the workspace.
pub use error::{Error, Result};
/// Identifiers for stored memories and short-term entries.
pub use ids::{EntryId, MemoryId};
/// Memory horizons and source routing.
pub use tier::{MemoryTier, TierRouting};
