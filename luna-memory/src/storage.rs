//! Durable record list persisted as a single JSON document.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use luna_primitives::MemoryId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::record::{MemoryRecord, format_timestamp};
use crate::{MemoryError, MemoryResult};

#[derive(Serialize)]
struct SnapshotDocument<'a> {
    memories: &'a [MemoryRecord],
    last_updated: String,
    count: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredDocument {
    Wrapped { memories: Vec<Value> },
    Legacy(Vec<Value>),
}

/// Record list with a dirty flag and an on-disk home.
///
/// Mutations only touch memory and mark the list dirty; [`flush`](Self::flush)
/// writes the whole list atomically. The type is not synchronised: the owning
/// [`VectorStore`](crate::store::VectorStore) guards it together with its index.
#[derive(Debug)]
pub struct VectorStorage {
    path: PathBuf,
    records: Vec<MemoryRecord>,
    dimension: Option<usize>,
    dirty: bool,
}

impl VectorStorage {
    /// Creates an empty storage that will persist to `path`.
    #[must_use]
    pub fn empty(path: impl Into<PathBuf>, dimension: Option<usize>) -> Self {
        Self {
            path: path.into(),
            records: Vec::new(),
            dimension,
            dirty: false,
        }
    }

    /// Loads the records stored at `path`.
    ///
    /// Never fails: a missing, unreadable or malformed file yields an empty
    /// storage. Individual records that fail to decode, or whose vector length
    /// disagrees with `dimension` (or with the first valid record when no
    /// dimension is given), are skipped.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>, dimension: Option<usize>) -> Self {
        let mut storage = Self::empty(path, dimension);
        let bytes = match fs::read(&storage.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %storage.path.display(), "no memory file yet; starting empty");
                return storage;
            }
            Err(err) => {
                warn!(
                    path = %storage.path.display(),
                    %err,
                    "memory file unreadable; starting empty"
                );
                return storage;
            }
        };

        let values = match serde_json::from_slice::<StoredDocument>(&bytes) {
            Ok(StoredDocument::Wrapped { memories } | StoredDocument::Legacy(memories)) => memories,
            Err(err) => {
                warn!(
                    path = %storage.path.display(),
                    %err,
                    "memory file malformed; starting empty"
                );
                return storage;
            }
        };

        let total = values.len();
        for (position, value) in values.into_iter().enumerate() {
            let record = match serde_json::from_value::<MemoryRecord>(value) {
                Ok(record) => record,
                Err(err) => {
                    warn!(position, %err, "skipping undecodable memory record");
                    continue;
                }
            };
            let expected = *storage.dimension.get_or_insert(record.vector().len());
            if record.vector().len() != expected {
                warn!(
                    id = %record.id(),
                    expected,
                    actual = record.vector().len(),
                    "skipping memory record with mismatched dimension"
                );
                continue;
            }
            storage.records.push(record);
        }

        info!(
            path = %storage.path.display(),
            loaded = storage.records.len(),
            skipped = total - storage.records.len(),
            "memory store loaded"
        );
        storage
    }

    /// Returns the file the storage persists to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the vector dimension, once known.
    #[must_use]
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Returns all records in insertion order.
    #[must_use]
    pub fn records(&self) -> &[MemoryRecord] {
        &self.records
    }

    /// Looks a record up by id.
    #[must_use]
    pub fn get(&self, id: &MemoryId) -> Option<&MemoryRecord> {
        self.records.iter().find(|record| record.id() == id)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns whether there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns `true` when unsaved changes exist.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Appends a record.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::DimensionMismatch`] when the vector length differs
    /// from the storage dimension.
    pub fn add_memory(&mut self, record: MemoryRecord) -> MemoryResult<()> {
        let actual = record.vector().len();
        let expected = *self.dimension.get_or_insert(actual);
        if actual != expected {
            return Err(MemoryError::DimensionMismatch { expected, actual });
        }
        self.records.push(record);
        self.dirty = true;
        Ok(())
    }

    /// Removes the first record with `id`.
    pub fn delete_memory(&mut self, id: &MemoryId) -> bool {
        let Some(position) = self.records.iter().position(|record| record.id() == id) else {
            return false;
        };
        self.records.remove(position);
        self.dirty = true;
        true
    }

    /// Increments the record's `frequency` counter.
    pub fn increment_frequency(&mut self, id: &MemoryId) -> bool {
        let Some(record) = self.records.iter_mut().find(|record| record.id() == id) else {
            return false;
        };
        let metadata = record.metadata_mut();
        metadata.frequency = metadata.frequency.saturating_add(1);
        self.dirty = true;
        true
    }

    /// Returns records created within `start..=end`. Records with malformed
    /// timestamps are skipped.
    #[must_use]
    pub fn get_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<MemoryRecord> {
        self.records
            .iter()
            .filter(|record| {
                checked_timestamp(record).is_some_and(|at| at >= start && at <= end)
            })
            .cloned()
            .collect()
    }

    /// Removes records created strictly before `before`, returning how many
    /// were removed. Records with malformed timestamps are kept.
    pub fn clear_old(&mut self, before: DateTime<Utc>) -> usize {
        let original = self.records.len();
        self.records
            .retain(|record| checked_timestamp(record).is_none_or(|at| at >= before));
        let removed = original - self.records.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    /// Writes the record list when dirty (or always when `force`).
    ///
    /// Returns whether a write happened. On failure the dirty flag stays set
    /// so the next flush retries; in-memory state is untouched either way.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Persist`] or [`MemoryError::Serialization`] when
    /// the snapshot could not be written.
    pub fn flush(&mut self, force: bool) -> MemoryResult<bool> {
        if !self.dirty && !force {
            return Ok(false);
        }
        self.write_snapshot()?;
        self.dirty = false;
        debug!(path = %self.path.display(), count = self.records.len(), "memory store flushed");
        Ok(true)
    }

    fn write_snapshot(&self) -> MemoryResult<()> {
        let persist_error = |source: io::Error| MemoryError::Persist {
            path: self.path.clone(),
            source,
        };

        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&directory).map_err(persist_error)?;

        let document = SnapshotDocument {
            memories: &self.records,
            last_updated: format_timestamp(Utc::now()),
            count: self.records.len(),
        };

        let mut temp = NamedTempFile::new_in(&directory).map_err(persist_error)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, &document)?;
            writer.flush().map_err(persist_error)?;
        }
        temp.as_file().sync_all().map_err(persist_error)?;
        temp.persist(&self.path)
            .map_err(|err| persist_error(err.error))?;
        Ok(())
    }
}

fn checked_timestamp(record: &MemoryRecord) -> Option<DateTime<Utc>> {
    let parsed = record.parsed_timestamp();
    if parsed.is_none() {
        warn!(
            id = %record.id(),
            timestamp = record.timestamp(),
            "skipping record with malformed timestamp"
        );
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingVector;
    use chrono::Duration;
    use serde_json::json;

    fn record(text: &str, values: &[f32]) -> MemoryRecord {
        MemoryRecord::builder(text, EmbeddingVector::from_slice(values).unwrap())
            .source("fact")
            .build()
            .unwrap()
    }

    #[test]
    fn mutations_mark_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = VectorStorage::empty(dir.path().join("m.json"), None);
        assert!(!storage.is_dirty());

        let alpha = record("alpha", &[1.0, 0.0]);
        let id = alpha.id().clone();
        storage.add_memory(alpha).unwrap();
        assert!(storage.is_dirty());
        assert!(storage.flush(false).unwrap());
        assert!(!storage.flush(false).unwrap(), "clean storage skips the write");

        assert!(storage.increment_frequency(&id));
        assert_eq!(storage.get(&id).unwrap().metadata().frequency, 1);
        assert!(storage.is_dirty());

        assert!(!storage.delete_memory(&MemoryId::generate()));
        assert!(storage.delete_memory(&id));
        assert!(storage.is_empty());
    }

    #[test]
    fn rejects_dimension_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = VectorStorage::empty(dir.path().join("m.json"), Some(2));
        let err = storage
            .add_memory(record("alpha", &[1.0, 0.0, 0.0]))
            .expect_err("wrong dimension");
        assert!(matches!(
            err,
            MemoryError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn flush_writes_wrapped_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memories.json");
        let mut storage = VectorStorage::empty(&path, None);
        storage.add_memory(record("alpha", &[1.0, 0.5])).unwrap();
        storage.flush(true).unwrap();

        let document: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(document["count"], json!(1));
        assert_eq!(document["memories"][0]["text"], json!("alpha"));
        assert_eq!(document["memories"][0]["vector"], json!([1.0, 0.5]));
        assert!(document["last_updated"].is_string());

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.path() != path)
            .collect();
        assert!(leftovers.is_empty(), "temporary file must be renamed away");
    }

    #[test]
    fn loads_legacy_arrays_and_skips_bad_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        let document = json!([
            {"id": "a", "text": "alpha", "source": "fact", "timestamp": "2024-01-01T00:00:00",
             "metadata": {"frequency": 2}, "vector": [1.0, 0.0]},
            {"id": "b", "text": "beta", "timestamp": "2024-01-02T00:00:00", "vector": [1.0]},
            {"id": "c", "text": "gamma"},
            {"id": "d", "text": "delta", "timestamp": "2024-01-03T00:00:00", "vector": [0.0, 1.0]}
        ]);
        fs::write(&path, serde_json::to_vec(&document).unwrap()).unwrap();

        let storage = VectorStorage::load(&path, None);
        let ids: Vec<_> = storage.records().iter().map(|r| r.id().as_str()).collect();
        assert_eq!(ids, ["a", "d"]);
        assert_eq!(storage.records()[0].metadata().frequency, 2);
        assert_eq!(storage.dimension(), Some(2));
        assert!(!storage.is_dirty());
    }

    #[test]
    fn corrupt_or_missing_files_start_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(VectorStorage::load(&path, None).is_empty());
        assert!(VectorStorage::load(dir.path().join("absent.json"), Some(4)).is_empty());
    }

    #[test]
    fn date_scans_skip_malformed_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dates.json");
        let now = Utc::now();
        let ten_days_ago = format_timestamp(now - Duration::days(10));
        let document = json!({
            "memories": [
                {"id": "old", "text": "old", "timestamp": ten_days_ago, "vector": [1.0]},
                {"id": "bad", "text": "bad", "timestamp": "not a date", "vector": [1.0]},
                {"id": "new", "text": "new", "timestamp": format_timestamp(now), "vector": [1.0]}
            ],
            "last_updated": format_timestamp(now),
            "count": 3
        });
        fs::write(&path, serde_json::to_vec(&document).unwrap()).unwrap();

        let mut storage = VectorStorage::load(&path, None);
        assert_eq!(storage.len(), 3);

        let recent = storage.get_by_date_range(now - Duration::days(1), now);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id().as_str(), "new");

        assert_eq!(storage.clear_old(now - Duration::days(5)), 1);
        let ids: Vec<_> = storage.records().iter().map(|r| r.id().as_str()).collect();
        assert_eq!(ids, ["bad", "new"]);
        assert!(storage.is_dirty());
    }
}
