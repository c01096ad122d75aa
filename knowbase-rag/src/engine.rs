//! Retrieval engine orchestrator.
//!
//! The [`RetrievalEngine`] owns one store instance and coordinates the
//! ingest-and-query workflow by composing an [`EmbeddingProvider`], a
//! [`Chunker`], a [`TextExtractor`] and the [`PersistenceManager`].
//!
//! # Example
//!
//! ```rust,ignore
//! use knowbase_rag::{DocumentMetadata, RagConfig, RetrievalEngine};
//!
//! let engine = RetrievalEngine::builder()
//!     .config(RagConfig::builder().store_path("vector_db").dimension(768).build()?)
//!     .embedding_provider(Arc::new(my_embedder))
//!     .open()
//!     .await?;
//!
//! engine.ingest("doc-1", &text, DocumentMetadata::new("notes.txt", "txt")).await?;
//! let results = engine.search("what is in my notes?").await?;
//! engine.close().await?;
//! ```
//!
//! # Concurrency
//!
//! The store sits behind a `tokio::sync::RwLock`. Embedding calls are made
//! before any lock is taken; writers hold the write lock only for the
//! in-memory transaction, and queries hold the read lock for search plus
//! hydration. Snapshots are written one at a time in revision order.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::chunking::{Chunker, FixedSizeChunker};
use crate::config::RagConfig;
use crate::document::{ChunkId, DocumentEntry, DocumentMetadata, DocumentSummary, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{IngestStage, RagError, Result};
use crate::extract::{FileTextExtractor, SUPPORTED_FILE_TYPES, TextExtractor, file_type_of};
use crate::persistence::PersistenceManager;
use crate::store::{PreparedDocument, StoreState};

/// Durability state of a store instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    /// No chunks, and nothing waiting to be written.
    Empty,
    /// Every change is on disk.
    Populated,
    /// The in-memory store is ahead of the last snapshot.
    PendingWrite,
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub document_id: String,
    /// Ids assigned to the document's chunks, in ordinal order.
    pub chunk_ids: Vec<ChunkId>,
}

/// Mint a fresh document id.
pub fn new_document_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn join_error(e: tokio::task::JoinError) -> RagError {
    RagError::Io(std::io::Error::other(e))
}

/// The retrieval engine for one store instance.
///
/// Construct one via [`RetrievalEngine::builder()`] or
/// [`RetrievalEngine::open`], share it behind an `Arc`, and call
/// [`close`](Self::close) before shutdown so the last change is durable.
pub struct RetrievalEngine {
    config: RagConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    chunker: Arc<dyn Chunker>,
    text_extractor: Arc<dyn TextExtractor>,
    persistence: PersistenceManager,
    state: RwLock<StoreState>,
    save_lock: Mutex<()>,
    durable_revision: AtomicU64,
}

impl RetrievalEngine {
    /// Create a new [`RetrievalEngineBuilder`].
    pub fn builder() -> RetrievalEngineBuilder {
        RetrievalEngineBuilder::default()
    }

    /// Open the store at `config.store_path` with the default chunker and
    /// text extractor.
    pub async fn open(config: RagConfig, embedding_provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        Self::builder().config(config).embedding_provider(embedding_provider).open().await
    }

    /// Return a reference to the engine configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return a reference to the embedding provider.
    pub fn embedding_provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedding_provider
    }

    /// Ingest one document: chunk → embed → store → persist.
    ///
    /// All chunks are embedded in one batch before the store is locked. If
    /// embedding fails, neither half of the store is touched.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmptyDocument`] if chunking yields nothing.
    /// - [`RagError::DocumentExists`] if the id was already ingested.
    /// - [`RagError::Ingestion`] wrapping the failure and its stage
    ///   otherwise. A `Persist` failure leaves the document in memory; it is
    ///   written by the next successful save, [`flush`](Self::flush) or
    ///   [`close`](Self::close).
    pub async fn ingest(
        &self,
        document_id: &str,
        raw_text: &str,
        metadata: DocumentMetadata,
    ) -> Result<IngestReport> {
        // 1. Chunk the document
        let texts = self.chunker.chunk(raw_text);
        if texts.is_empty() {
            warn!(document.id = %document_id, "refusing to ingest empty document");
            return Err(RagError::EmptyDocument(document_id.to_string()));
        }
        if self.state.read().await.metadata().contains_document(document_id) {
            return Err(RagError::DocumentExists(document_id.to_string()));
        }

        // 2. Generate embeddings, outside any lock
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let embeddings = self.embedding_provider.embed_batch(&refs).await.map_err(|e| {
            error!(document.id = %document_id, error = %e, "embedding failed during ingestion");
            e.during(document_id, IngestStage::Embed)
        })?;
        self.check_embeddings(texts.len(), &embeddings).map_err(|e| {
            error!(document.id = %document_id, error = %e, "embedding provider returned bad vectors");
            e.during(document_id, IngestStage::Embed)
        })?;

        // 3. Apply to both stores as one transaction
        let prepared = PreparedDocument {
            document_id: document_id.to_string(),
            metadata,
            text: raw_text.to_string(),
            chunks: texts.into_iter().zip(embeddings).collect(),
        };
        let chunk_ids = {
            let mut state = self.state.write().await;
            state.apply_ingest(prepared).map_err(|e| {
                error!(document.id = %document_id, error = %e, "store rejected document");
                e.during(document_id, IngestStage::Index)
            })?
        };

        let chunk_count = chunk_ids.len();
        info!(document.id = %document_id, chunk_count, "ingested document");

        // 4. Persist
        self.persist().await.map_err(|e| {
            error!(document.id = %document_id, error = %e, "snapshot failed after ingestion");
            e.during(document_id, IngestStage::Persist)
        })?;

        Ok(IngestReport { document_id: document_id.to_string(), chunk_ids })
    }

    fn check_embeddings(&self, expected: usize, embeddings: &[Vec<f32>]) -> Result<()> {
        if embeddings.len() != expected {
            return Err(RagError::EmbeddingError {
                provider: self.embedding_provider.name().to_string(),
                message: format!("expected {expected} embeddings, got {}", embeddings.len()),
            });
        }
        let dimension = self.config.dimension;
        if let Some(v) = embeddings.iter().find(|v| v.len() != dimension) {
            return Err(RagError::DimensionMismatch { expected: dimension, actual: v.len() });
        }
        if let Some(chunk) = embeddings.iter().position(|v| v.iter().any(|x| !x.is_finite())) {
            return Err(RagError::EmbeddingError {
                provider: self.embedding_provider.name().to_string(),
                message: format!("embedding for chunk {chunk} contains NaN or infinite values"),
            });
        }
        Ok(())
    }

    /// Extract, then ingest, an uploaded file under a fresh document id.
    ///
    /// The file type is the lowercased extension and must be one of
    /// [`SUPPORTED_FILE_TYPES`]. `extra` is stored with the document metadata.
    pub async fn ingest_file(&self, path: &Path, extra: BTreeMap<String, String>) -> Result<IngestReport> {
        let document_id = new_document_id();
        let file_type = file_type_of(path)
            .filter(|t| SUPPORTED_FILE_TYPES.contains(&t.as_str()))
            .ok_or_else(|| {
                RagError::ExtractionError {
                    path: path.display().to_string(),
                    message: format!("unsupported file type; expected one of {SUPPORTED_FILE_TYPES:?}"),
                }
                .during(&document_id, IngestStage::Extract)
            })?;

        let extractor = Arc::clone(&self.text_extractor);
        let owned_path = path.to_path_buf();
        let extract_type = file_type.clone();
        let text = tokio::task::spawn_blocking(move || extractor.extract_text(&owned_path, &extract_type))
            .await
            .map_err(join_error)
            .and_then(|r| r)
            .map_err(|e| {
                error!(path = %path.display(), error = %e, "text extraction failed");
                e.during(&document_id, IngestStage::Extract)
            })?;

        let filename =
            path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| path.display().to_string());
        let metadata = DocumentMetadata { filename, file_type, uploaded_at: Utc::now(), extra };
        self.ingest(&document_id, &text, metadata).await
    }

    /// Delete a document and all of its chunks, then persist.
    ///
    /// Returns the removed chunk ids.
    ///
    /// # Errors
    ///
    /// [`RagError::NotFound`] if the document is unknown; the store is
    /// unchanged in that case.
    pub async fn delete_document(&self, document_id: &str) -> Result<BTreeSet<ChunkId>> {
        let removed = {
            let mut state = self.state.write().await;
            state.apply_delete(document_id).inspect_err(|e| {
                warn!(document.id = %document_id, error = %e, "delete failed");
            })?
        };
        info!(document.id = %document_id, chunk_count = removed.len(), "deleted document");

        self.persist().await.inspect_err(|e| {
            error!(document.id = %document_id, error = %e, "snapshot failed after delete");
        })?;
        Ok(removed)
    }

    /// Query the store: embed → search `k` → drop scores below `min_score`
    /// → hydrate.
    ///
    /// An empty store returns an empty result without calling the embedding
    /// provider; callers should read that as "no knowledge base context".
    ///
    /// # Errors
    ///
    /// [`RagError::EmbeddingError`] if the query cannot be embedded, or
    /// [`RagError::DimensionMismatch`] or [`RagError::NonFiniteVector`] if
    /// the provider returns a vector of the wrong length or with NaN values.
    pub async fn query(&self, text: &str, k: usize, min_score: f32) -> Result<Vec<SearchResult>> {
        if self.state.read().await.index().is_empty() {
            info!(result_count = 0, "query against empty store");
            return Ok(Vec::new());
        }

        // 1. Embed the query
        let query_embedding = self.embedding_provider.embed(text).await.inspect_err(|e| {
            error!(error = %e, "embedding failed during query");
        })?;

        // 2. Search and hydrate under one read lock
        let results = self.state.read().await.search(&query_embedding, k, min_score).inspect_err(|e| {
            error!(error = %e, "search failed");
        })?;

        info!(k, min_score, result_count = results.len(), "query completed");
        Ok(results)
    }

    /// [`query`](Self::query) with the configured `top_k` and
    /// `similarity_threshold`.
    pub async fn search(&self, text: &str) -> Result<Vec<SearchResult>> {
        self.query(text, self.config.top_k, self.config.similarity_threshold).await
    }

    /// Summaries of all documents, oldest upload first.
    pub async fn list_documents(&self) -> Vec<DocumentSummary> {
        self.state.read().await.metadata().list_documents()
    }

    /// Full stored entry for one document.
    pub async fn document(&self, document_id: &str) -> Option<DocumentEntry> {
        self.state.read().await.metadata().document(document_id).cloned()
    }

    /// Number of live chunks.
    pub async fn chunk_count(&self) -> usize {
        self.state.read().await.index().len()
    }

    pub async fn status(&self) -> StoreStatus {
        let state = self.state.read().await;
        if state.revision() > self.durable_revision.load(Ordering::Acquire) {
            StoreStatus::PendingWrite
        } else if state.index().is_empty() {
            StoreStatus::Empty
        } else {
            StoreStatus::Populated
        }
    }

    /// Write a snapshot if the store has changed since the last one.
    pub async fn flush(&self) -> Result<()> {
        self.persist().await
    }

    /// Flush and release the store.
    pub async fn close(self) -> Result<()> {
        self.persist().await?;
        info!(dir = %self.persistence.dir().display(), "closed store");
        Ok(())
    }

    /// Snapshot the current revision unless it is already durable.
    ///
    /// The save lock is held from capture to commit, so snapshots reach disk
    /// in revision order.
    async fn persist(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;

        let snapshot = {
            let state = self.state.read().await;
            if state.revision() <= self.durable_revision.load(Ordering::Acquire) {
                return Ok(());
            }
            state.clone()
        };
        let revision = snapshot.revision();

        let manager = self.persistence.clone();
        let generation = tokio::task::spawn_blocking(move || manager.save(&snapshot)).await.map_err(join_error)??;

        self.durable_revision.store(revision, Ordering::Release);
        debug!(generation, revision, "store persisted");
        Ok(())
    }
}

/// Builder for opening a [`RetrievalEngine`].
///
/// `config` and `embedding_provider` are required. The chunker defaults to
/// a [`FixedSizeChunker`] built from the config, and the text extractor to
/// [`FileTextExtractor`].
#[derive(Default)]
pub struct RetrievalEngineBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    chunker: Option<Arc<dyn Chunker>>,
    text_extractor: Option<Arc<dyn TextExtractor>>,
}

impl RetrievalEngineBuilder {
    /// Set the engine configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Override the document chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Override the text extractor used by [`RetrievalEngine::ingest_file`].
    pub fn text_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.text_extractor = Some(extractor);
        self
    }

    /// Validate the configuration and open the store.
    ///
    /// An existing snapshot is loaded; a missing one yields an empty store.
    ///
    /// # Errors
    ///
    /// - [`RagError::ConfigError`] if a required field is missing, the
    ///   config is invalid, or the provider's or snapshot's dimension/metric
    ///   disagree with the config.
    /// - [`RagError::CorruptStore`] if the snapshot fails its consistency
    ///   checks. The store is never silently replaced by an empty one.
    pub async fn open(self) -> Result<RetrievalEngine> {
        let config = self.config.ok_or_else(|| RagError::ConfigError("config is required".to_string()))?;
        config.validate()?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        if embedding_provider.dimensions() != config.dimension {
            return Err(RagError::ConfigError(format!(
                "embedding provider '{}' produces {} dimensions but the store uses {}",
                embedding_provider.name(),
                embedding_provider.dimensions(),
                config.dimension
            )));
        }
        let chunker = match self.chunker {
            Some(chunker) => chunker,
            None => Arc::new(FixedSizeChunker::new(config.chunk_size, config.chunk_overlap)?),
        };
        let text_extractor = self.text_extractor.unwrap_or_else(|| Arc::new(FileTextExtractor));

        let persistence = PersistenceManager::new(config.store_path.clone());
        let loader = persistence.clone();
        let loaded = tokio::task::spawn_blocking(move || loader.load()).await.map_err(join_error)?.inspect_err(|e| {
            error!(dir = %config.store_path.display(), error = %e, "failed to load store");
        })?;

        let state = match loaded {
            Some(state) => {
                let index = state.index();
                if index.dimension() != config.dimension || index.metric() != config.metric {
                    return Err(RagError::ConfigError(format!(
                        "store at {} was created with dimension {} and metric {:?}, config asks for {} and {:?}",
                        config.store_path.display(),
                        index.dimension(),
                        index.metric(),
                        config.dimension,
                        config.metric
                    )));
                }
                state
            }
            None => {
                info!(dir = %config.store_path.display(), "creating new store");
                StoreState::new(config.dimension, config.metric)
            }
        };

        info!(
            dir = %config.store_path.display(),
            chunk_count = state.index().len(),
            document_count = state.metadata().document_count(),
            "opened store"
        );

        let durable_revision = AtomicU64::new(state.revision());
        Ok(RetrievalEngine {
            config,
            embedding_provider,
            chunker,
            text_extractor,
            persistence,
            state: RwLock::new(state),
            save_lock: Mutex::new(()),
            durable_revision,
        })
    }
}
