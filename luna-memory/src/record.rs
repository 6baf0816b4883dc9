//! Stored memory records and their typed metadata.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use luna_primitives::MemoryId;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::embeddings::EmbeddingVector;
use crate::{MemoryError, MemoryResult};

/// Metadata attached to a record.
///
/// Well-known keys are typed; anything else survives in [`extra`](Self::extra)
/// and is written back alongside them in the same JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    /// Access / duplicate counter.
    #[serde(default, deserialize_with = "lenient_count")]
    pub frequency: u64,
    /// Category label assigned by the caller or the categoriser.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Importance in `0.0..=1.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<f32>,
    /// Emotion tags detected in the text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emotions: Vec<String>,
    /// Keys without a typed counterpart.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MemoryMetadata {
    /// Sets the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Sets the importance, clamped into `0.0..=1.0`.
    #[must_use]
    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = Some(importance.clamp(0.0, 1.0));
        self
    }

    /// Adds an untyped entry.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(number)) => number.as_u64().unwrap_or_else(|| {
            number.as_f64().filter(|f| *f > 0.0).map_or(0, |f| f as u64)
        }),
        _ => 0,
    })
}

/// One stored memory unit.
///
/// `text`, `vector` and `timestamp` never change after creation; only the
/// metadata is mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    id: MemoryId,
    text: String,
    #[serde(default)]
    source: String,
    timestamp: String,
    #[serde(default)]
    metadata: MemoryMetadata,
    vector: EmbeddingVector,
}

impl MemoryRecord {
    /// Creates a builder for a new record.
    #[must_use]
    pub fn builder(text: impl Into<String>, vector: EmbeddingVector) -> MemoryRecordBuilder {
        MemoryRecordBuilder {
            id: MemoryId::generate(),
            text: text.into(),
            vector,
            source: String::new(),
            timestamp: Utc::now(),
            metadata: MemoryMetadata::default(),
        }
    }

    /// Returns the record identifier.
    #[must_use]
    pub fn id(&self) -> &MemoryId {
        &self.id
    }

    /// Returns the original text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the provenance tag.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the creation time exactly as stored.
    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Parses the stored creation time; `None` when it is malformed.
    #[must_use]
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }

    /// Returns the metadata.
    #[must_use]
    pub fn metadata(&self) -> &MemoryMetadata {
        &self.metadata
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut MemoryMetadata {
        &mut self.metadata
    }

    /// Returns the embedding.
    #[must_use]
    pub fn vector(&self) -> &EmbeddingVector {
        &self.vector
    }
}

/// Builder type used to assemble [`MemoryRecord`] instances.
#[derive(Debug)]
pub struct MemoryRecordBuilder {
    id: MemoryId,
    text: String,
    vector: EmbeddingVector,
    source: String,
    timestamp: DateTime<Utc>,
    metadata: MemoryMetadata,
}

impl MemoryRecordBuilder {
    /// Overrides the generated identifier.
    #[must_use]
    pub fn id(mut self, id: MemoryId) -> Self {
        self.id = id;
        self
    }

    /// Sets the provenance tag.
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Overrides the creation time.
    #[must_use]
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the metadata.
    #[must_use]
    pub fn metadata(mut self, metadata: MemoryMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Finalises the builder and produces the record.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] when the text is empty.
    pub fn build(self) -> MemoryResult<MemoryRecord> {
        if self.text.trim().is_empty() {
            return Err(MemoryError::InvalidRecord("memory text must not be empty"));
        }
        Ok(MemoryRecord {
            id: self.id,
            text: self.text,
            source: self.source,
            timestamp: format_timestamp(self.timestamp),
            metadata: self.metadata,
            vector: self.vector,
        })
    }
}

/// Formats an instant the way records store it.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses an ISO-8601 timestamp. Offsets are honoured; naive values are
/// taken as UTC.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}
