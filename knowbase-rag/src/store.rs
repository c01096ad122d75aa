//! The paired vector index and metadata store, mutated as one unit.
//!
//! Every chunk id in the [`VectorIndex`] has exactly one record in the
//! [`MetadataStore`] and vice versa. The only mutating entry points are
//! [`StoreState::apply_ingest`] and [`StoreState::apply_delete`], which
//! either change both halves or neither.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::document::{ChunkId, ChunkRecord, DocumentMetadata, SearchResult};
use crate::error::{RagError, Result};
use crate::index::{SimilarityMetric, VectorIndex};
use crate::metadata::MetadataStore;

/// A document whose chunks have already been embedded, ready to be applied.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub document_id: String,
    pub metadata: DocumentMetadata,
    pub text: String,
    /// `(chunk text, embedding)` in ordinal order.
    pub chunks: Vec<(String, Vec<f32>)>,
}

/// In-memory state of one store instance.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreState {
    index: VectorIndex,
    metadata: MetadataStore,
    next_chunk_id: u64,
    revision: u64,
}

impl StoreState {
    /// An empty store.
    pub fn new(dimension: usize, metric: SimilarityMetric) -> Self {
        Self { index: VectorIndex::new(dimension, metric), metadata: MetadataStore::new(), next_chunk_id: 1, revision: 0 }
    }

    /// Reassemble a store from loaded halves, checking that they agree.
    ///
    /// # Errors
    ///
    /// [`RagError::CorruptStore`] if the id sets differ or the allocator
    /// would hand out an id that is already in use.
    pub(crate) fn from_parts(index: VectorIndex, metadata: MetadataStore, next_chunk_id: u64) -> Result<Self> {
        if index.len() != metadata.len() {
            return Err(RagError::CorruptStore(format!(
                "index holds {} vectors but metadata holds {} records",
                index.len(),
                metadata.len()
            )));
        }
        for (id, _) in index.iter() {
            if metadata.get(id).is_err() {
                return Err(RagError::CorruptStore(format!("vector {id} has no metadata record")));
            }
        }
        if let Some((last, _)) = index.iter().next_back() {
            if last.0 >= next_chunk_id {
                return Err(RagError::CorruptStore(format!(
                    "next chunk id {next_chunk_id} is not above highest id {last}"
                )));
            }
        }
        Ok(Self { index, metadata, next_chunk_id, revision: 0 })
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// The id the next ingested chunk will receive.
    pub fn next_chunk_id(&self) -> u64 {
        self.next_chunk_id
    }

    /// Counter bumped by every successful mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Insert a document and all of its chunks, assigning fresh chunk ids.
    ///
    /// # Errors
    ///
    /// [`RagError::DocumentExists`], [`RagError::EmptyDocument`],
    /// [`RagError::DimensionMismatch`] or [`RagError::NonFiniteVector`]; the
    /// store is unchanged on error.
    pub fn apply_ingest(&mut self, document: PreparedDocument) -> Result<Vec<ChunkId>> {
        let PreparedDocument { document_id, metadata, text, chunks } = document;

        if self.metadata.contains_document(&document_id) {
            return Err(RagError::DocumentExists(document_id));
        }
        if chunks.is_empty() {
            return Err(RagError::EmptyDocument(document_id));
        }
        let dimension = self.index.dimension();
        if let Some((_, v)) = chunks.iter().find(|(_, v)| v.len() != dimension) {
            return Err(RagError::DimensionMismatch { expected: dimension, actual: v.len() });
        }
        if let Some(position) = chunks.iter().find_map(|(_, v)| v.iter().position(|x| !x.is_finite())) {
            return Err(RagError::NonFiniteVector { position });
        }

        self.metadata.put_document(&document_id, metadata, text)?;

        let first_id = self.next_chunk_id;
        let mut assigned = Vec::with_capacity(chunks.len());
        for (ordinal, (chunk_text, embedding)) in chunks.into_iter().enumerate() {
            let id = ChunkId(self.next_chunk_id);
            self.next_chunk_id += 1;
            let record = ChunkRecord { document_id: document_id.clone(), ordinal, text: chunk_text };
            if let Err(e) = self.index.insert(id, embedding) {
                warn!(document.id = %document_id, chunk.id = %id, error = %e, "rolling back ingest");
                self.rollback_ingest(&document_id, &assigned, first_id);
                return Err(e);
            }
            assigned.push(id);
            if let Err(e) = self.metadata.put(id, record) {
                warn!(document.id = %document_id, chunk.id = %id, error = %e, "rolling back ingest");
                self.rollback_ingest(&document_id, &assigned, first_id);
                return Err(e);
            }
        }

        self.revision += 1;
        Ok(assigned)
    }

    fn rollback_ingest(&mut self, document_id: &str, inserted: &[ChunkId], first_id: u64) {
        for id in inserted {
            // Present by construction; nothing else to undo if not.
            let _ = self.index.remove(*id);
        }
        let _ = self.metadata.delete_by_document(document_id);
        self.next_chunk_id = first_id;
    }

    /// Remove a document and its chunks from both halves.
    ///
    /// # Errors
    ///
    /// [`RagError::NotFound`] if the document is unknown.
    pub fn apply_delete(&mut self, document_id: &str) -> Result<BTreeSet<ChunkId>> {
        let entry = self
            .metadata
            .document(document_id)
            .ok_or_else(|| RagError::NotFound(format!("document '{document_id}'")))?;
        if let Some(missing) = entry.chunk_ids.iter().find(|id| !self.index.contains(**id)) {
            return Err(RagError::CorruptStore(format!(
                "document '{document_id}' lists chunk {missing} absent from the index"
            )));
        }

        let removed = self.metadata.delete_by_document(document_id)?;
        for id in &removed {
            self.index.remove(*id)?;
        }
        self.revision += 1;
        Ok(removed)
    }

    /// Rank chunks against `query` and hydrate them.
    ///
    /// Candidates scoring below `min_score` are dropped after the top `k`
    /// have been selected.
    ///
    /// # Errors
    ///
    /// [`RagError::DimensionMismatch`] if `query` has the wrong length.
    pub fn search(&self, query: &[f32], k: usize, min_score: f32) -> Result<Vec<SearchResult>> {
        let hits = self.index.search(query, k)?;
        let scores: BTreeMap<ChunkId, f32> =
            hits.iter().filter(|h| h.score >= min_score).map(|h| (h.id, h.score)).collect();
        let ids: Vec<ChunkId> = hits.iter().map(|h| h.id).filter(|id| scores.contains_key(id)).collect();

        Ok(self
            .metadata
            .get_many(&ids)
            .into_iter()
            .map(|(id, record)| SearchResult {
                chunk_id: id,
                score: scores[&id],
                text: record.text.clone(),
                document_id: record.document_id.clone(),
                filename: self
                    .metadata
                    .document(&record.document_id)
                    .map(|entry| entry.metadata.filename.clone())
                    .unwrap_or_default(),
                ordinal: record.ordinal,
            })
            .collect())
    }
}
