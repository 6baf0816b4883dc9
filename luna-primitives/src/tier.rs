//! Memory horizons and the routing of provenance tags onto them.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Horizon a memory lives in. Promotion only ever moves towards [`MemoryTier::LongTerm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    /// TTL-bound buffer of recent observations.
    ShortTerm,
    /// Persisted conversational memory subject to age-based decay.
    MediumTerm,
    /// Persisted knowledge that is never decayed.
    LongTerm,
}

impl MemoryTier {
    /// Returns the canonical snake_case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::MediumTerm => "medium_term",
            Self::LongTerm => "long_term",
        }
    }

    /// Returns `true` for tiers backed by a persisted vector store.
    #[must_use]
    pub const fn is_persistent(self) -> bool {
        !matches!(self, Self::ShortTerm)
    }
}

impl Display for MemoryTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short_term" | "short" => Ok(Self::ShortTerm),
            "medium_term" | "medium" => Ok(Self::MediumTerm),
            "long_term" | "long" => Ok(Self::LongTerm),
            _ => Err(Error::UnknownTier(s.to_owned())),
        }
    }
}

/// Maps free-form `source` tags onto tiers.
///
/// Matching is case-insensitive. Sources listed in neither table land in
/// short-term memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierRouting {
    /// Sources stored straight into long-term memory.
    pub long_term_sources: Vec<String>,
    /// Sources stored into medium-term memory.
    pub medium_term_sources: Vec<String>,
}

impl TierRouting {
    /// Resolves the tier for a source tag.
    #[must_use]
    pub fn tier_for(&self, source: &str) -> MemoryTier {
        let matches = |list: &[String]| list.iter().any(|s| s.eq_ignore_ascii_case(source.trim()));
        if matches(&self.long_term_sources) {
            MemoryTier::LongTerm
        } else if matches(&self.medium_term_sources) {
            MemoryTier::MediumTerm
        } else {
            MemoryTier::ShortTerm
        }
    }
}

impl Default for TierRouting {
    fn default() -> Self {
        Self {
            long_term_sources: vec!["fact".into(), "preference".into(), "profile".into()],
            medium_term_sources: vec!["conversation".into(), "summary".into()],
        }
    }
}
