//! Layered CLI settings: TOML file, then environment and flags.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use knowbase_rag::gemini::GeminiEmbeddingProvider;
use knowbase_rag::openai::OpenAIEmbeddingProvider;
use knowbase_rag::{EmbeddingProvider, RagConfig, SimilarityMetric};
use serde::Deserialize;

/// Which embedding service backs the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Gemini,
    #[value(name = "openai")]
    OpenAi,
}

/// Embedding provider settings from the `[embedding]` table.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: ProviderKind,
    pub model: Option<String>,
    /// OpenAI-compatible server URL.
    pub base_url: Option<String>,
}

/// Contents of a `knowbase.toml` file.
///
/// ```toml
/// store_path = "vector_db"
/// dimension = 768
/// chunk_size = 1000
///
/// [embedding]
/// provider = "gemini"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(flatten)]
    pub rag: RagConfig,
    pub embedding: EmbeddingSettings,
}

/// Values given on the command line or through `KNOWBASE_*` variables.
/// Each one that is set wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub store_path: Option<PathBuf>,
    pub dimension: Option<usize>,
    pub metric: Option<SimilarityMetric>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

impl Settings {
    /// Read settings from `path`, or start from defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn apply(mut self, overrides: Overrides) -> Self {
        let Overrides { store_path, dimension, metric, chunk_size, chunk_overlap, provider, model, base_url } =
            overrides;
        if let Some(v) = store_path {
            self.rag.store_path = v;
        }
        if let Some(v) = dimension {
            self.rag.dimension = v;
        }
        if let Some(v) = metric {
            self.rag.metric = v;
        }
        if let Some(v) = chunk_size {
            self.rag.chunk_size = v;
        }
        if let Some(v) = chunk_overlap {
            self.rag.chunk_overlap = v;
        }
        if let Some(v) = provider {
            self.embedding.provider = v;
        }
        if model.is_some() {
            self.embedding.model = model;
        }
        if base_url.is_some() {
            self.embedding.base_url = base_url;
        }
        self
    }

    /// Build the configured provider, sized to the store dimension.
    ///
    /// API keys come from `GEMINI_API_KEY` / `OPENAI_API_KEY`.
    pub fn embedding_provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        let dimension = self.rag.dimension;
        let provider: Arc<dyn EmbeddingProvider> = match self.embedding.provider {
            ProviderKind::Gemini => {
                if self.embedding.base_url.is_some() {
                    bail!("base_url is only supported for the openai provider");
                }
                let mut provider = GeminiEmbeddingProvider::from_env()?;
                if let Some(model) = &self.embedding.model {
                    provider = provider.with_model(model);
                }
                if provider.dimensions() != dimension {
                    provider = provider.with_output_dimensionality(dimension);
                }
                Arc::new(provider)
            }
            ProviderKind::OpenAi => {
                let mut provider = OpenAIEmbeddingProvider::from_env()?.with_dimensions(dimension);
                if let Some(model) = &self.embedding.model {
                    provider = provider.with_model(model);
                }
                if let Some(url) = &self.embedding.base_url {
                    provider = provider.with_base_url(url);
                }
                Arc::new(provider)
            }
        };
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_fill_in_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowbase.toml");
        std::fs::write(
            &path,
            r#"
store_path = "/srv/kb"
chunk_size = 500
metric = "inner_product"

[embedding]
provider = "openai"
model = "text-embedding-3-large"
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.rag.store_path, PathBuf::from("/srv/kb"));
        assert_eq!(settings.rag.chunk_size, 500);
        assert_eq!(settings.rag.chunk_overlap, 100);
        assert_eq!(settings.rag.metric, SimilarityMetric::InnerProduct);
        assert_eq!(settings.embedding.provider, ProviderKind::OpenAi);
        assert_eq!(settings.embedding.model.as_deref(), Some("text-embedding-3-large"));
    }

    #[test]
    fn overrides_win_over_file() {
        let settings = Settings::default().apply(Overrides {
            store_path: Some(PathBuf::from("elsewhere")),
            dimension: Some(256),
            provider: Some(ProviderKind::OpenAi),
            ..Overrides::default()
        });
        assert_eq!(settings.rag.store_path, PathBuf::from("elsewhere"));
        assert_eq!(settings.rag.dimension, 256);
        assert_eq!(settings.rag.top_k, 5);
        assert_eq!(settings.embedding.provider, ProviderKind::OpenAi);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = toml::from_str::<Settings>("[embedding]\nprovider = \"cohere\"\n");
        assert!(err.is_err());
    }
}
