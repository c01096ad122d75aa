//! Embeddings from OpenAI or any server speaking its `/embeddings` protocol.
//!
//! Requires the `openai` feature.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Native size of `text-embedding-3-small`.
const DEFAULT_DIMENSIONS: usize = 1536;

/// Most inputs the endpoint accepts in one request.
const MAX_INPUTS_PER_REQUEST: usize = 2048;

const PROVIDER: &str = "OpenAI";

fn provider_error(message: impl Into<String>) -> RagError {
    RagError::EmbeddingError { provider: PROVIDER.into(), message: message.into() }
}

/// Embedding provider for the OpenAI embeddings API.
///
/// Store chunks are usually embedded at a smaller size than the model's
/// native one, so [`with_dimensions`](Self::with_dimensions) asks the server
/// to shorten its vectors to the store dimension.
///
/// ```rust,ignore
/// use knowbase_rag::openai::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::from_env()?.with_dimensions(768);
/// ```
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
    requested_dimensions: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(provider_error("API key must not be empty"));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: OPENAI_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            dimensions: DEFAULT_DIMENSIONS,
            requested_dimensions: None,
        })
    }

    /// Read the key from `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| provider_error("OPENAI_API_KEY environment variable not set"))?;
        Self::new(api_key)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the provider at an OpenAI-compatible server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Ask the server for vectors of `dims` values.
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.requested_dimensions = Some(dims);
        self
    }

    /// Request bodies covering `texts` in order, each within the input limit.
    fn requests<'a>(&'a self, texts: &'a [&'a str]) -> impl Iterator<Item = EmbeddingRequest<'a>> {
        texts.chunks(MAX_INPUTS_PER_REQUEST).map(move |input| EmbeddingRequest {
            model: &self.model,
            input,
            dimensions: self.requested_dimensions,
        })
    }

    async fn send(&self, request: &EmbeddingRequest<'_>) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
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

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            error!(provider = PROVIDER, error = %e, "failed to parse response");
            provider_error(format!("failed to parse response: {e}"))
        })?;
        into_input_order(parsed.data, request.input.len())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Put response items back in input order and check none are missing.
fn into_input_order(mut data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vec<f32>>> {
    data.sort_by_key(|d| d.index);
    if data.len() != expected || data.iter().enumerate().any(|(i, d)| d.index != i) {
        return Err(provider_error(format!("expected {expected} embeddings, got {}", data.len())));
    }
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = PROVIDER, text_len = text.len(), "embedding query");
        let texts = [text];
        let request = EmbeddingRequest { model: &self.model, input: &texts, dimensions: self.requested_dimensions };
        self.send(&request).await?.pop().ok_or_else(|| provider_error("API returned empty response"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(provider = PROVIDER, batch_size = texts.len(), model = %self.model, "embedding batch");

        let mut embeddings = Vec::with_capacity(texts.len());
        for request in self.requests(texts) {
            embeddings.extend(self.send(&request).await?);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_items_are_reordered_by_index() {
        let data = vec![
            EmbeddingData { index: 1, embedding: vec![2.0] },
            EmbeddingData { index: 0, embedding: vec![1.0] },
        ];
        assert_eq!(into_input_order(data, 2).unwrap(), vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn short_response_is_an_error() {
        let data = vec![EmbeddingData { index: 0, embedding: vec![1.0] }];
        assert!(matches!(into_input_order(data, 2), Err(RagError::EmbeddingError { .. })));
    }

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(OpenAIEmbeddingProvider::new("").is_err());
    }

    #[test]
    fn inputs_over_the_limit_are_split_in_order() {
        let provider = OpenAIEmbeddingProvider::new("key").unwrap().with_dimensions(768);
        let owned: Vec<String> = (0..5000).map(|i| i.to_string()).collect();
        let texts: Vec<&str> = owned.iter().map(String::as_str).collect();

        let requests: Vec<_> = provider.requests(&texts).collect();
        let sizes: Vec<usize> = requests.iter().map(|r| r.input.len()).collect();
        assert_eq!(sizes, vec![2048, 2048, 904]);
        assert!(requests.iter().all(|r| r.dimensions == Some(768)));
        let flattened: Vec<&str> = requests.iter().flat_map(|r| r.input.iter().copied()).collect();
        assert_eq!(flattened, texts);
    }
}
