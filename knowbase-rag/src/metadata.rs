//! Chunk and document metadata keyed by logical id.

use std::collections::{BTreeMap, BTreeSet};

use crate::document::{ChunkId, ChunkRecord, DocumentEntry, DocumentMetadata, DocumentSummary};
use crate::error::{RagError, Result};

/// Maps chunk ids back to their text and parent document, and keeps the
/// document catalogue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataStore {
    documents: BTreeMap<String, DocumentEntry>,
    chunks: BTreeMap<ChunkId, ChunkRecord>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted parts.
    ///
    /// # Errors
    ///
    /// [`RagError::CorruptStore`] if a chunk points at an unknown document or
    /// a document lists a chunk that is missing or belongs elsewhere.
    pub(crate) fn from_parts(
        documents: BTreeMap<String, DocumentEntry>,
        chunks: BTreeMap<ChunkId, ChunkRecord>,
    ) -> Result<Self> {
        for (id, record) in &chunks {
            if !documents.contains_key(&record.document_id) {
                return Err(RagError::CorruptStore(format!(
                    "chunk {id} references unknown document '{}'",
                    record.document_id
                )));
            }
        }
        let mut listed = 0;
        for (doc_id, entry) in &documents {
            for id in &entry.chunk_ids {
                match chunks.get(id) {
                    Some(record) if record.document_id == *doc_id => listed += 1,
                    _ => {
                        return Err(RagError::CorruptStore(format!(
                            "document '{doc_id}' lists chunk {id} which it does not own"
                        )));
                    }
                }
            }
        }
        if listed != chunks.len() {
            return Err(RagError::CorruptStore(format!(
                "{} chunk records but documents list {listed}",
                chunks.len()
            )));
        }
        Ok(Self { documents, chunks })
    }

    pub(crate) fn documents(&self) -> &BTreeMap<String, DocumentEntry> {
        &self.documents
    }

    pub(crate) fn chunks(&self) -> &BTreeMap<ChunkId, ChunkRecord> {
        &self.chunks
    }

    /// Number of chunk records.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn contains_document(&self, document_id: &str) -> bool {
        self.documents.contains_key(document_id)
    }

    pub fn document(&self, document_id: &str) -> Option<&DocumentEntry> {
        self.documents.get(document_id)
    }

    /// Register a document with no chunks yet.
    ///
    /// # Errors
    ///
    /// [`RagError::DocumentExists`] if the id is taken.
    pub fn put_document(&mut self, document_id: &str, metadata: DocumentMetadata, text: String) -> Result<()> {
        if self.documents.contains_key(document_id) {
            return Err(RagError::DocumentExists(document_id.to_string()));
        }
        self.documents.insert(document_id.to_string(), DocumentEntry { metadata, text, chunk_ids: Vec::new() });
        Ok(())
    }

    /// Store `record` under `id` and append `id` to its document's chunk list.
    ///
    /// # Errors
    ///
    /// [`RagError::DuplicateId`] if `id` is present, [`RagError::NotFound`] if
    /// the parent document is unknown.
    pub fn put(&mut self, id: ChunkId, record: ChunkRecord) -> Result<()> {
        if self.chunks.contains_key(&id) {
            return Err(RagError::DuplicateId(id));
        }
        let entry = self
            .documents
            .get_mut(&record.document_id)
            .ok_or_else(|| RagError::NotFound(format!("document '{}'", record.document_id)))?;
        entry.chunk_ids.push(id);
        self.chunks.insert(id, record);
        Ok(())
    }

    pub fn get(&self, id: ChunkId) -> Result<&ChunkRecord> {
        self.chunks.get(&id).ok_or_else(|| RagError::NotFound(format!("chunk {id}")))
    }

    /// Look up several ids, preserving input order and skipping absent ones.
    pub fn get_many<'a>(&'a self, ids: &[ChunkId]) -> Vec<(ChunkId, &'a ChunkRecord)> {
        ids.iter().filter_map(|id| self.chunks.get(id).map(|record| (*id, record))).collect()
    }

    /// Remove a document and every chunk record belonging to it.
    ///
    /// Returns exactly the chunk ids that must also leave the vector index.
    ///
    /// # Errors
    ///
    /// [`RagError::NotFound`] if the document is unknown.
    pub fn delete_by_document(&mut self, document_id: &str) -> Result<BTreeSet<ChunkId>> {
        let entry = self
            .documents
            .remove(document_id)
            .ok_or_else(|| RagError::NotFound(format!("document '{document_id}'")))?;
        let removed: BTreeSet<ChunkId> = entry.chunk_ids.into_iter().collect();
        for id in &removed {
            self.chunks.remove(id);
        }
        Ok(removed)
    }

    /// Document summaries ordered by upload time, then id.
    pub fn list_documents(&self) -> Vec<DocumentSummary> {
        let mut summaries: Vec<DocumentSummary> = self
            .documents
            .iter()
            .map(|(id, entry)| DocumentSummary {
                id: id.clone(),
                filename: entry.metadata.filename.clone(),
                file_type: entry.metadata.file_type.clone(),
                uploaded_at: entry.metadata.uploaded_at,
                chunk_count: entry.chunk_ids.len(),
            })
            .collect();
        summaries.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at).then_with(|| a.id.cmp(&b.id)));
        summaries
    }
}
