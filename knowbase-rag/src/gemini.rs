//! Gemini embedding provider calling the Generative Language REST API.
//!
//! This module is only available when the `gemini` feature is enabled.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// The default embedding model.
const DEFAULT_MODEL: &str = "embedding-001";

/// Dimensionality of `embedding-001`.
const DEFAULT_DIMENSIONS: usize = 768;

const PROVIDER: &str = "Gemini";

/// Most requests `batchEmbedContents` accepts in one call.
const MAX_BATCH_SIZE: usize = 100;

fn provider_error(message: impl Into<String>) -> RagError {
    RagError::EmbeddingError { provider: PROVIDER.into(), message: message.into() }
}

/// An [`EmbeddingProvider`] backed by the Gemini embedding API.
///
/// Batches (document chunks) are embedded with task type
/// `RETRIEVAL_DOCUMENT`; single texts (queries) with `RETRIEVAL_QUERY`.
///
/// # Example
///
/// ```rust,ignore
/// use knowbase_rag::gemini::GeminiEmbeddingProvider;
///
/// let provider = GeminiEmbeddingProvider::from_env()?;
/// let embedding = provider.embed("hello world").await?;
/// ```
pub struct GeminiEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
    output_dimensionality: Option<usize>,
}

impl GeminiEmbeddingProvider {
    /// Create a new provider using the given API key and `embedding-001`.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(provider_error("API key must not be empty"));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: GEMINI_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            dimensions: DEFAULT_DIMENSIONS,
            output_dimensionality: None,
        })
    }

    /// Create a new provider using the `GEMINI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| provider_error("GEMINI_API_KEY environment variable not set"))?;
        Self::new(api_key)
    }

    /// Set the model name, without the `models/` prefix.
    ///
    /// Also set [`with_output_dimensionality`](Self::with_output_dimensionality)
    /// if the model's native size differs from 768.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Truncate output vectors to `dims` values.
    pub fn with_output_dimensionality(mut self, dims: usize) -> Self {
        self.output_dimensionality = Some(dims);
        self.dimensions = dims;
        self
    }

    fn model_path(&self) -> String {
        format!("models/{}", self.model)
    }

    fn request<'a>(&self, model: &'a str, text: &'a str, task_type: &'static str) -> EmbedContentRequest<'a> {
        EmbedContentRequest {
            model,
            content: Content { parts: vec![Part { text }] },
            task_type,
            output_dimensionality: self.output_dimensionality,
        }
    }

    /// One `batchEmbedContents` body per run of at most [`MAX_BATCH_SIZE`]
    /// texts, in input order.
    fn batch_requests<'a>(&self, model: &'a str, texts: &[&'a str]) -> Vec<BatchEmbedRequest<'a>> {
        texts
            .chunks(MAX_BATCH_SIZE)
            .map(|batch| BatchEmbedRequest {
                requests: batch.iter().map(|&text| self.request(model, text, "RETRIEVAL_DOCUMENT")).collect(),
            })
            .collect()
    }

    async fn post<B: Serialize + Sync, R: DeserializeOwned + Send>(&self, method: &str, body: &B) -> Result<R> {
        let url = format!("{}/{}:{method}", self.base_url, self.model_path());
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = PROVIDER, error = %e, "request failed");
                provider_error(format!("request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error.message).unwrap_or(body);
            error!(provider = PROVIDER, %status, "API error");
            return Err(provider_error(format!("API returned {status}: {detail}")));
        }

        response.json().await.map_err(|e| {
            error!(provider = PROVIDER, error = %e, "failed to parse response");
            provider_error(format!("failed to parse response: {e}"))
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = PROVIDER, text_len = text.len(), "embedding single text");

        let model = self.model_path();
        let body = self.request(&model, text, "RETRIEVAL_QUERY");
        let response: EmbedContentResponse = self.post("embedContent", &body).await?;
        Ok(response.embedding.values)
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(provider = PROVIDER, batch_size = texts.len(), model = %self.model, "embedding batch");

        let model = self.model_path();
        let mut embeddings = Vec::with_capacity(texts.len());
        for body in self.batch_requests(&model, texts) {
            let expected = body.requests.len();
            let response: BatchEmbedResponse = self.post("batchEmbedContents", &body).await?;
            if response.embeddings.len() != expected {
                return Err(provider_error(format!(
                    "expected {expected} embeddings, got {}",
                    response.embeddings.len()
                )));
            }
            embeddings.extend(response.embeddings.into_iter().map(|e| e.values));
        }
        Ok(embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
