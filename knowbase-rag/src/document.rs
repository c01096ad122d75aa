//! Data types for documents, chunks, and search results.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Logical id of a chunk: the join key between the vector index and the
/// metadata store.
///
/// Ids are handed out in increasing order and never reused by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub u64);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Document-level metadata captured at upload time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentMetadata {
    /// Original filename of the upload.
    pub filename: String,
    /// Lowercase file extension (`pdf`, `txt`, `json`, `md`).
    pub file_type: String,
    /// When the document was uploaded.
    pub uploaded_at: DateTime<Utc>,
    /// Open-ended additional key-value metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl DocumentMetadata {
    /// Metadata for a document uploaded now.
    pub fn new(filename: impl Into<String>, file_type: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            file_type: file_type.into(),
            uploaded_at: Utc::now(),
            extra: BTreeMap::new(),
        }
    }

    /// Attach an extra key-value pair.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// A stored document: metadata, raw text, and the chunks cut from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentEntry {
    /// Upload metadata.
    pub metadata: DocumentMetadata,
    /// The raw extracted text.
    pub text: String,
    /// Chunk ids in ordinal order.
    pub chunk_ids: Vec<ChunkId>,
}

/// Metadata record for a single chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkRecord {
    /// The ID of the parent document.
    pub document_id: String,
    /// Position of the chunk within its document, starting at 0.
    pub ordinal: usize,
    /// The text content of the chunk.
    pub text: String,
}

/// A row of the document listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentSummary {
    pub id: String,
    pub filename: String,
    pub file_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub chunk_count: usize,
}

/// A retrieved chunk paired with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The matching chunk.
    pub chunk_id: ChunkId,
    /// The similarity score (higher is more relevant).
    pub score: f32,
    /// The chunk text.
    pub text: String,
    /// The ID of the parent document.
    pub document_id: String,
    /// Upload filename of the parent document, for citing the source.
    pub filename: String,
    /// Position of the chunk within its document.
    pub ordinal: usize,
}
