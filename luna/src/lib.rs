//! Luna assistant memory SDK facade.
//!
//! Depend on this crate via `cargo add luna`. It bundles the workspace crates
//! behind feature flags so downstream users only compile what they need.

#![warn(missing_docs, clippy::pedantic)]

/// Re-export shared primitives for convenience.
pub use luna_primitives as primitives;

/// Layered memory subsystem (enabled by `memory` feature).
#[cfg(feature = "memory")]
pub use luna_memory as memory;
