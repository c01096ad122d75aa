//! Exact in-memory vector index.
//!
//! [`VectorIndex`] keeps every vector in a `BTreeMap` keyed by [`ChunkId`] and
//! answers k-nearest-neighbour queries by scoring all of them. Iteration order
//! is the id order, and ranking breaks score ties by ascending id, so identical
//! inputs always produce identical result sequences.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::document::ChunkId;
use crate::error::{RagError, Result};

/// The similarity metric of a store, fixed when the store is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Cosine similarity; zero vectors score 0.0 against everything.
    #[default]
    Cosine,
    /// Raw dot product.
    InnerProduct,
}

impl SimilarityMetric {
    /// Score `a` against `b`. Both slices must have the same length.
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        match self {
            Self::InnerProduct => dot,
            Self::Cosine => {
                let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 0.0;
                }
                dot / (norm_a * norm_b)
            }
        }
    }
}

/// A ranked hit from [`VectorIndex::search`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredId {
    pub id: ChunkId,
    pub score: f32,
}

/// Descending score, then ascending id.
fn rank(a: &ScoredId, b: &ScoredId) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id))
}

/// Exact k-nearest-neighbour index over fixed-dimension vectors.
///
/// # Example
///
/// ```rust,ignore
/// use knowbase_rag::{ChunkId, SimilarityMetric, VectorIndex};
///
/// let mut index = VectorIndex::new(3, SimilarityMetric::Cosine);
/// index.insert(ChunkId(1), vec![1.0, 0.0, 0.0])?;
/// let hits = index.search(&[1.0, 0.0, 0.0], 5)?;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    metric: SimilarityMetric,
    vectors: BTreeMap<ChunkId, Vec<f32>>,
}

impl VectorIndex {
    /// Create an empty index for vectors of length `dimension`.
    pub fn new(dimension: usize, metric: SimilarityMetric) -> Self {
        Self { dimension, metric, vectors: BTreeMap::new() }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    /// Number of live vectors.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn contains(&self, id: ChunkId) -> bool {
        self.vectors.contains_key(&id)
    }

    /// Iterate over `(id, vector)` pairs in ascending id order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (ChunkId, &[f32])> {
        self.vectors.iter().map(|(id, v)| (*id, v.as_slice()))
    }

    /// Vectors must have the index dimension and only finite components;
    /// a NaN would serialize as `null` and make the snapshot unreadable.
    fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(RagError::DimensionMismatch { expected: self.dimension, actual: vector.len() });
        }
        match vector.iter().position(|x| !x.is_finite()) {
            Some(position) => Err(RagError::NonFiniteVector { position }),
            None => Ok(()),
        }
    }

    /// Add `vector` under `id`.
    ///
    /// # Errors
    ///
    /// [`RagError::DimensionMismatch`], [`RagError::NonFiniteVector`] or
    /// [`RagError::DuplicateId`]; the index is left unchanged on error.
    pub fn insert(&mut self, id: ChunkId, vector: Vec<f32>) -> Result<()> {
        self.check_vector(&vector)?;
        if self.vectors.contains_key(&id) {
            return Err(RagError::DuplicateId(id));
        }
        self.vectors.insert(id, vector);
        Ok(())
    }

    /// Remove the vector stored under `id`, returning it.
    ///
    /// # Errors
    ///
    /// [`RagError::NotFound`] if `id` is absent.
    pub fn remove(&mut self, id: ChunkId) -> Result<Vec<f32>> {
        self.vectors.remove(&id).ok_or_else(|| RagError::NotFound(format!("chunk {id}")))
    }

    /// Return up to `k` ids ranked by similarity to `query`.
    ///
    /// An empty index or `k == 0` yields an empty result.
    ///
    /// # Errors
    ///
    /// [`RagError::DimensionMismatch`] if `query` has the wrong length, or
    /// [`RagError::NonFiniteVector`] if it holds NaN or an infinity.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredId>> {
        self.check_vector(query)?;
        if k == 0 || self.vectors.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<ScoredId> = self
            .vectors
            .iter()
            .map(|(id, vector)| ScoredId { id: *id, score: self.metric.score(vector, query) })
            .collect();

        if scored.len() > k {
            scored.select_nth_unstable_by(k - 1, rank);
            scored.truncate(k);
        }
        scored.sort_by(rank);
        Ok(scored)
    }
}
