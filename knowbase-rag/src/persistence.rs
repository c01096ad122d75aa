//! Crash-safe paired snapshots of the vector index and metadata store.
//!
//! A store directory holds numbered generations. Each generation is two
//! files, `index-<gen>.json` and `metadata-<gen>.json`, sharing one
//! [`SnapshotHeader`]. The `CURRENT` manifest names the committed
//! generation and is only ever replaced by an atomic rename, so both files
//! of a generation become visible together or not at all:
//!
//! ```text
//! stage:  index-<n>.json.tmp ─fsync─▶ index-<n>.json
//!         metadata-<n>.json.tmp ─fsync─▶ metadata-<n>.json  (fsync dir)
//! commit: CURRENT.tmp ─fsync─▶ CURRENT  (fsync dir, drop older generations)
//! ```
//!
//! A crash before the `CURRENT` rename leaves the previous generation in
//! place; leftover files from the failed attempt are ignored by
//! [`PersistenceManager::load`] and removed by the next commit.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::document::{ChunkId, ChunkRecord, DocumentEntry};
use crate::error::{RagError, Result};
use crate::index::{SimilarityMetric, VectorIndex};
use crate::metadata::MetadataStore;
use crate::store::StoreState;

/// Bumped whenever the on-disk layout changes incompatibly.
pub const FORMAT_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "CURRENT";
const TMP_SUFFIX: &str = ".tmp";

/// Header written into both artifacts of a generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub format_version: u32,
    pub generation: u64,
    pub dimension: usize,
    pub metric: SimilarityMetric,
    pub chunk_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    generation: u64,
}

#[derive(Serialize)]
struct IndexFileOut<'a> {
    header: &'a SnapshotHeader,
    vectors: Vec<IndexEntryOut<'a>>,
}

#[derive(Serialize)]
struct IndexEntryOut<'a> {
    id: ChunkId,
    vector: &'a [f32],
}

#[derive(Deserialize)]
struct IndexFileIn {
    header: SnapshotHeader,
    vectors: Vec<IndexEntryIn>,
}

#[derive(Deserialize)]
struct IndexEntryIn {
    id: ChunkId,
    vector: Vec<f32>,
}

#[derive(Serialize)]
struct MetadataFileOut<'a> {
    header: &'a SnapshotHeader,
    next_chunk_id: u64,
    documents: &'a BTreeMap<String, DocumentEntry>,
    chunks: Vec<ChunkEntryOut<'a>>,
}

#[derive(Serialize)]
struct ChunkEntryOut<'a> {
    id: ChunkId,
    #[serde(flatten)]
    record: &'a ChunkRecord,
}

#[derive(Deserialize)]
struct MetadataFileIn {
    header: SnapshotHeader,
    next_chunk_id: u64,
    documents: BTreeMap<String, DocumentEntry>,
    chunks: Vec<ChunkEntryIn>,
}

#[derive(Deserialize)]
struct ChunkEntryIn {
    id: ChunkId,
    #[serde(flatten)]
    record: ChunkRecord,
}

fn index_file_name(generation: u64) -> String {
    format!("index-{generation}.json")
}

fn metadata_file_name(generation: u64) -> String {
    format!("metadata-{generation}.json")
}

/// Generation number encoded in a snapshot file name, if it is one.
fn generation_of(file_name: &str) -> Option<u64> {
    let stem = file_name.strip_suffix(TMP_SUFFIX).unwrap_or(file_name).strip_suffix(".json")?;
    let number = stem.strip_prefix("index-").or_else(|| stem.strip_prefix("metadata-"))?;
    number.parse().ok()
}

fn with_tmp_suffix(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

/// Write `value` as JSON to `<path>.tmp`, fsync it, then rename it to `path`.
fn write_durably<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp_path = with_tmp_suffix(path);
    let file = File::create(&tmp_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)
        .map_err(|e| RagError::CorruptStore(format!("cannot open {}: {e}", path.display())))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| RagError::CorruptStore(format!("cannot parse {}: {e}", path.display())))
}

/// Reads and writes paired snapshots in one store directory.
///
/// The manager holds no store data; it only serialises a [`StoreState`] it
/// is handed and rebuilds one on [`load`](Self::load).
#[derive(Debug, Clone)]
pub struct PersistenceManager {
    dir: PathBuf,
}

impl PersistenceManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Generation named by `CURRENT`, or `None` for a fresh directory.
    pub fn current_generation(&self) -> Result<Option<u64>> {
        let path = self.dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let manifest: Manifest = read_json(&path)?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(RagError::CorruptStore(format!(
                "unsupported snapshot format {} (expected {FORMAT_VERSION})",
                manifest.format_version
            )));
        }
        Ok(Some(manifest.generation))
    }

    /// Stage and commit a new generation.
    pub fn save(&self, state: &StoreState) -> Result<u64> {
        self.stage(state)?.commit()
    }

    /// Write both artifacts of the next generation without publishing them.
    ///
    /// Until [`StagedSnapshot::commit`] runs, [`load`](Self::load) keeps
    /// returning the previously committed generation.
    pub fn stage(&self, state: &StoreState) -> Result<StagedSnapshot> {
        fs::create_dir_all(&self.dir)?;
        let generation = self.current_generation()?.map_or(1, |g| g + 1);

        let index = state.index();
        let metadata = state.metadata();
        let header = SnapshotHeader {
            format_version: FORMAT_VERSION,
            generation,
            dimension: index.dimension(),
            metric: index.metric(),
            chunk_count: index.len(),
        };

        let index_out = IndexFileOut {
            header: &header,
            vectors: index.iter().map(|(id, vector)| IndexEntryOut { id, vector }).collect(),
        };
        write_durably(&self.dir.join(index_file_name(generation)), &index_out)?;

        let metadata_out = MetadataFileOut {
            header: &header,
            next_chunk_id: state.next_chunk_id(),
            documents: metadata.documents(),
            chunks: metadata.chunks().iter().map(|(id, record)| ChunkEntryOut { id: *id, record }).collect(),
        };
        write_durably(&self.dir.join(metadata_file_name(generation)), &metadata_out)?;
        // Both renames must be durable before CURRENT can name them.
        sync_dir(&self.dir)?;

        debug!(dir = %self.dir.display(), generation, chunk_count = header.chunk_count, "staged snapshot");
        Ok(StagedSnapshot { dir: self.dir.clone(), generation })
    }

    /// Load the committed generation.
    ///
    /// Returns `Ok(None)` if nothing has ever been committed here.
    ///
    /// # Errors
    ///
    /// [`RagError::CorruptStore`] if the snapshot is unreadable or its two
    /// halves disagree. There is no partial recovery.
    pub fn load(&self) -> Result<Option<StoreState>> {
        let Some(generation) = self.current_generation()? else {
            return Ok(None);
        };

        let index_file: IndexFileIn = read_json(&self.dir.join(index_file_name(generation)))?;
        let metadata_file: MetadataFileIn = read_json(&self.dir.join(metadata_file_name(generation)))?;

        let header = index_file.header;
        if header != metadata_file.header {
            return Err(RagError::CorruptStore(format!(
                "index header {header:?} does not match metadata header {:?}",
                metadata_file.header
            )));
        }
        if header.generation != generation {
            return Err(RagError::CorruptStore(format!(
                "manifest names generation {generation} but files carry {}",
                header.generation
            )));
        }
        if index_file.vectors.len() != header.chunk_count || metadata_file.chunks.len() != header.chunk_count {
            return Err(RagError::CorruptStore(format!(
                "header declares {} chunks but found {} vectors and {} records",
                header.chunk_count,
                index_file.vectors.len(),
                metadata_file.chunks.len()
            )));
        }

        let mut index = VectorIndex::new(header.dimension, header.metric);
        for entry in index_file.vectors {
            index
                .insert(entry.id, entry.vector)
                .map_err(|e| RagError::CorruptStore(format!("bad vector in generation {generation}: {e}")))?;
        }

        let mut chunks = BTreeMap::new();
        for entry in metadata_file.chunks {
            if chunks.insert(entry.id, entry.record).is_some() {
                return Err(RagError::CorruptStore(format!("duplicate chunk record {}", entry.id)));
            }
        }
        let metadata = MetadataStore::from_parts(metadata_file.documents, chunks)?;
        let state = StoreState::from_parts(index, metadata, metadata_file.next_chunk_id)?;

        info!(
            dir = %self.dir.display(),
            generation,
            chunk_count = state.index().len(),
            document_count = state.metadata().document_count(),
            "loaded snapshot"
        );
        Ok(Some(state))
    }
}

/// A generation written to disk but not yet named by `CURRENT`.
///
/// Dropping it without calling [`commit`](Self::commit) abandons the
/// generation; the files are cleaned up by the next successful commit.
#[derive(Debug)]
#[must_use = "a staged snapshot is invisible until committed"]
pub struct StagedSnapshot {
    dir: PathBuf,
    generation: u64,
}

impl StagedSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Atomically publish this generation and remove older ones.
    pub fn commit(self) -> Result<u64> {
        let manifest = Manifest { format_version: FORMAT_VERSION, generation: self.generation };
        write_durably(&self.dir.join(MANIFEST_FILE), &manifest)?;
        sync_dir(&self.dir)?;
        self.remove_stale_files();
        debug!(dir = %self.dir.display(), generation = self.generation, "committed snapshot");
        Ok(self.generation)
    }

    fn remove_stale_files(&self) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "cannot list store directory for cleanup");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let stale = match generation_of(name) {
                Some(generation) => generation != self.generation || name.ends_with(TMP_SUFFIX),
                None => name == format!("{MANIFEST_FILE}{TMP_SUFFIX}"),
            };
            if stale {
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!(file = name, error = %e, "failed to remove stale snapshot file");
                }
            }
        }
    }
}
