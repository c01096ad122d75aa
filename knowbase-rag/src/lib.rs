//! # knowbase-rag
//!
//! Retrieval engine for a private knowledge base.
//!
//! Documents are split into overlapping passages, embedded by an external
//! [`EmbeddingProvider`], and stored as a pair: an exact [`VectorIndex`] for
//! nearest-neighbour search and a [`MetadataStore`] mapping chunk ids back to
//! text and document identity. Both halves are written to disk together as
//! one snapshot generation, so they never diverge.
//!
//! ```text
//! ingest: text → Chunker → EmbeddingProvider::embed_batch → StoreState (index + metadata) → snapshot
//! query:  text → EmbeddingProvider::embed → VectorIndex::search(k) → MetadataStore::get_many → results
//! ```
//!
//! ## Features
//!
//! - `openai`: [`openai::OpenAIEmbeddingProvider`]
//! - `gemini`: [`gemini::GeminiEmbeddingProvider`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use knowbase_rag::{RagConfig, RetrievalEngine};
//!
//! let config = RagConfig::builder().store_path("vector_db").dimension(768).build()?;
//! let engine = RetrievalEngine::open(config, Arc::new(provider)).await?;
//! let report = engine.ingest_file(Path::new("handbook.md"), Default::default()).await?;
//! for hit in engine.search("vacation policy").await? {
//!     println!("{:.3} {}", hit.score, hit.text);
//! }
//! engine.close().await?;
//! ```

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod index;
pub mod metadata;
pub mod persistence;
pub mod store;

#[cfg(feature = "gemini")]
pub mod gemini;
#[cfg(feature = "openai")]
pub mod openai;

pub use chunking::{Chunker, FixedSizeChunker, TextWindow, Windows, WordChunker};
pub use config::{RagConfig, RagConfigBuilder};
pub use document::{ChunkId, ChunkRecord, DocumentEntry, DocumentMetadata, DocumentSummary, SearchResult};
pub use embedding::EmbeddingProvider;
pub use engine::{IngestReport, RetrievalEngine, RetrievalEngineBuilder, StoreStatus, new_document_id};
pub use error::{IngestStage, RagError, Result};
pub use extract::{FileTextExtractor, SUPPORTED_FILE_TYPES, TextExtractor};
pub use index::{ScoredId, SimilarityMetric, VectorIndex};
pub use metadata::MetadataStore;
pub use persistence::{PersistenceManager, SnapshotHeader, StagedSnapshot};
pub use store::{PreparedDocument, StoreState};
