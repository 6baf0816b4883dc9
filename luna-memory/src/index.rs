//! Dense brute-force similarity index.
//!
//! Every query compares against every row: O(N·dim) per search. There is no
//! tree, hashing or quantisation, so results are exact and suited to stores
//! in the low thousands of records. Deletion is not incremental; callers
//! [`rebuild`](VectorIndex::rebuild) afterwards.

use luna_primitives::MemoryId;
use serde::Serialize;

use crate::embeddings::{EmbeddingVector, dot, l2_norm};
use crate::record::{MemoryMetadata, MemoryRecord};

/// Record returned from a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Identifier of the matched record.
    pub id: MemoryId,
    /// Original text.
    pub text: String,
    /// Provenance tag.
    pub source: String,
    /// Creation time as stored.
    pub timestamp: String,
    /// Metadata snapshot at query time.
    pub metadata: MemoryMetadata,
    /// Cosine similarity in `-1.0..=1.0`.
    pub similarity: f32,
}

impl SearchHit {
    fn from_record(record: &MemoryRecord, similarity: f32) -> Self {
        Self {
            id: record.id().clone(),
            text: record.text().to_owned(),
            source: record.source().to_owned(),
            timestamp: record.timestamp().to_owned(),
            metadata: record.metadata().clone(),
            similarity,
        }
    }
}

/// Row-major matrix of embeddings with cached row norms.
///
/// Row `i` always corresponds to record `i` of the backing list.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    dimension: usize,
    matrix: Vec<f32>,
    norms: Vec<f64>,
}

impl VectorIndex {
    /// Creates an empty index for vectors of `dimension` components.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            matrix: Vec::new(),
            norms: Vec::new(),
        }
    }

    /// Recomputes the matrix and norms from `records`.
    pub fn rebuild(&mut self, records: &[MemoryRecord]) {
        if let Some(first) = records.first() {
            self.dimension = first.vector().len();
        }
        self.matrix.clear();
        self.norms.clear();
        self.matrix.reserve(records.len() * self.dimension);
        self.norms.reserve(records.len());
        for record in records {
            self.push_row(record.vector().as_slice());
        }
    }

    /// Appends one row.
    pub fn add_vector(&mut self, vector: &EmbeddingVector) {
        if self.rows() == 0 {
            self.dimension = vector.len();
        }
        self.push_row(vector.as_slice());
    }

    fn push_row(&mut self, values: &[f32]) {
        debug_assert_eq!(values.len(), self.dimension);
        self.matrix.extend_from_slice(values);
        let norm = l2_norm(values);
        self.norms.push(if norm == 0.0 { 1.0 } else { norm });
    }

    /// Returns the `limit` records most similar to `query`, best first.
    ///
    /// `records` must be the list the index was built from. A zero query
    /// yields no results. Equal scores keep their insertion order.
    #[must_use]
    pub fn search(
        &self,
        query: &EmbeddingVector,
        records: &[MemoryRecord],
        limit: usize,
    ) -> Vec<SearchHit> {
        debug_assert_eq!(records.len(), self.rows());
        let query = query.as_slice();
        let query_norm = l2_norm(query);
        if limit == 0
            || query_norm == 0.0
            || self.rows() == 0
            || query.len() != self.dimension
        {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = self
            .matrix
            .chunks_exact(self.dimension)
            .zip(&self.norms)
            .map(|(row, norm)| cosine(dot(row, query), norm * query_norm))
            .enumerate()
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);
        scored
            .into_iter()
            .filter_map(|(row, similarity)| {
                records
                    .get(row)
                    .map(|record| SearchHit::from_record(record, similarity))
            })
            .collect()
    }

    /// Number of rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.norms.len()
    }

    /// Vector dimension (0 until the first row is added, unless fixed at construction).
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// `(rows, dimension)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows(), self.dimension)
    }

    /// Returns `true` when at least one row exists.
    #[must_use]
    pub fn is_built(&self) -> bool {
        self.rows() > 0
    }
}

#[allow(clippy::cast_possible_truncation)]
fn cosine(dot: f64, norms: f64) -> f32 {
    let score = (dot / norms).clamp(-1.0, 1.0);
    if score.is_nan() { 0.0 } else { score as f32 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(text: &str, values: &[f32]) -> MemoryRecord {
        MemoryRecord::builder(text, EmbeddingVector::from_slice(values).unwrap())
            .source("fact")
            .build()
            .unwrap()
    }

    fn query(values: &[f32]) -> EmbeddingVector {
        EmbeddingVector::from_slice(values).unwrap()
    }

    #[test]
    fn ranks_by_cosine_similarity() {
        let records = vec![
            record("alpha", &[1.0, 0.0, 0.0, 0.0]),
            record("beta", &[0.0, 1.0, 0.0, 0.0]),
            record("gamma", &[1.0, 1.0, 0.0, 0.0]),
        ];
        let mut index = VectorIndex::new(4);
        index.rebuild(&records);

        let hits = index.search(&query(&[2.0, 0.0, 0.0, 0.0]), &records, 3);
        let texts: Vec<_> = hits.iter().map(|hit| hit.text.as_str()).collect();
        assert_eq!(texts, ["alpha", "gamma", "beta"]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert!((hits[1].similarity - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!(hits[2].similarity.abs() < 1e-6);
    }

    #[test]
    fn zero_rows_and_zero_queries_are_safe() {
        let records = vec![record("zero", &[0.0, 0.0]), record("one", &[0.0, 1.0])];
        let mut index = VectorIndex::new(2);
        index.rebuild(&records);

        assert!(index.search(&query(&[0.0, 0.0]), &records, 5).is_empty());

        let hits = index.search(&query(&[0.0, 1.0]), &records, 5);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|hit| hit.similarity.is_finite()));
        assert_eq!(hits[1].text, "zero");
        assert_eq!(hits[1].similarity, 0.0);
    }

    #[test]
    fn incremental_append_matches_rebuild() {
        let records = vec![record("a", &[1.0, 2.0]), record("b", &[3.0, -1.0])];
        let mut incremental = VectorIndex::new(2);
        for record in &records {
            incremental.add_vector(record.vector());
        }
        let mut rebuilt = VectorIndex::new(2);
        rebuilt.rebuild(&records);

        assert_eq!(incremental.shape(), (2, 2));
        assert_eq!(incremental.matrix, rebuilt.matrix);
        assert_eq!(incremental.norms, rebuilt.norms);
    }

    #[test]
    fn scores_stay_within_unit_interval() {
        let records = vec![
            record("a", &[0.1, 0.2, 0.3]),
            record("b", &[-0.1, -0.2, -0.3]),
            record("c", &[1e-3, 5.0, -7.0]),
        ];
        let mut index = VectorIndex::new(3);
        index.rebuild(&records);
        for hit in index.search(&query(&[0.1, 0.2, 0.3]), &records, 3) {
            assert!((-1.0..=1.0).contains(&hit.similarity));
        }
    }

    #[test]
    fn large_components_score_without_overflow() {
        let records = vec![record("big", &[1e20, 1e20]), record("small", &[1.0, 0.0])];
        let mut index = VectorIndex::new(2);
        index.rebuild(&records);

        let hits = index.search(&query(&[1e20, 1e20]), &records, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "big");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert!((hits[1].similarity - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!(hits.iter().all(|hit| (-1.0..=1.0).contains(&hit.similarity)));

        let hits = index.search(&query(&[3e38, -3e38]), &records, 2);
        assert!(hits.iter().all(|hit| hit.similarity.is_finite()));
    }
}
