//! Deterministic embedding providers for tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use knowbase_rag::{EmbeddingProvider, RagConfig, RagError, Result, RetrievalEngine};

pub const DIM: usize = 64;

fn bucket(s: &str) -> usize {
    // FNV-1a
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in s.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % DIM as u64) as usize
}

/// Embeds text as counts of hashed character unigrams and trigrams.
///
/// All components are non-negative, so cosine scores lie in `[0, 1]`, and
/// texts sharing characters score above zero.
pub fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; DIM];
    let chars: Vec<char> = text.to_lowercase().chars().collect();
    for c in &chars {
        vector[bucket(&c.to_string())] += 1.0;
    }
    for window in chars.windows(3) {
        let gram: String = window.iter().collect();
        vector[bucket(&gram)] += 1.0;
    }
    vector
}

/// Hash embedder that counts its calls and can be told to fail or to emit
/// NaN components.
#[derive(Default)]
pub struct TestEmbedder {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub nan: AtomicBool,
}

impl TestEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_nan(&self, nan: bool) {
        self.nan.store(nan, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for TestEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(RagError::EmbeddingError { provider: "test".into(), message: "quota exceeded".into() });
        }
        let mut vector = embed_text(text);
        if self.nan.load(Ordering::SeqCst) {
            vector[0] = f32::NAN;
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    fn name(&self) -> &str {
        "test"
    }
}

/// Returns vectors one element too short.
pub struct ShortVectorEmbedder;

#[async_trait]
impl EmbeddingProvider for ShortVectorEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0; DIM - 1])
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

pub fn config(dir: &Path) -> RagConfig {
    RagConfig::builder()
        .store_path(dir.join("store"))
        .dimension(DIM)
        .chunk_size(200)
        .chunk_overlap(20)
        .top_k(5)
        .build()
        .unwrap()
}

pub async fn open(dir: &Path, embedder: Arc<TestEmbedder>) -> RetrievalEngine {
    RetrievalEngine::open(config(dir), embedder).await.unwrap()
}
