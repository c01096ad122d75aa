//! Error types for the `knowbase-rag` crate.

use std::fmt;

use thiserror::Error;

use crate::document::ChunkId;

/// The ingestion step at which a document failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    /// Reading plain text out of the uploaded file.
    Extract,
    /// Calling the embedding provider for the document's chunks.
    Embed,
    /// Writing vectors and records into the store.
    Index,
    /// Writing the new snapshot to disk.
    Persist,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Extract => "extract",
            Self::Embed => "embed",
            Self::Index => "index",
            Self::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in retrieval-engine operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// A vector's length does not match the store dimension.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The dimension fixed for the store.
        expected: usize,
        /// The length of the offending vector.
        actual: usize,
    },

    /// A vector holds NaN or an infinity.
    #[error("Vector has a non-finite component at position {position}")]
    NonFiniteVector {
        /// Index of the first offending component.
        position: usize,
    },

    /// A chunk id is already present.
    #[error("Duplicate chunk id: {0}")]
    DuplicateId(ChunkId),

    /// A document with this id has already been ingested.
    #[error("Document already exists: {0}")]
    DocumentExists(String),

    /// The requested chunk or document does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Chunking produced no passages for the document.
    #[error("Document '{0}' is empty")]
    EmptyDocument(String),

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// Plain text could not be extracted from a file.
    #[error("Extraction error ({path}): {message}")]
    ExtractionError {
        /// The file that failed.
        path: String,
        /// A description of the failure.
        message: String,
    },

    /// The persisted snapshot failed a consistency check.
    #[error("Corrupt store: {0}")]
    CorruptStore(String),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Ingestion of a single document failed at the given stage.
    #[error("Ingestion of document '{document_id}' failed during {stage}: {source}")]
    Ingestion {
        /// The document being ingested.
        document_id: String,
        /// The step that failed.
        stage: IngestStage,
        /// The underlying error.
        #[source]
        source: Box<RagError>,
    },

    /// Filesystem error while reading or writing snapshots.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Snapshot (de)serialization error.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    /// Wrap `self` with the document and stage it failed in.
    pub(crate) fn during(self, document_id: &str, stage: IngestStage) -> Self {
        Self::Ingestion { document_id: document_id.to_string(), stage, source: Box::new(self) }
    }

    /// Strip any [`RagError::Ingestion`] context and return the underlying error.
    pub fn root_cause(&self) -> &RagError {
        match self {
            Self::Ingestion { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// A convenience result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RagError>;
