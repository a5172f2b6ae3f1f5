//! Embedding provider selection.
//!
//! Named providers have a known dimension. Any other name is served locally
//! and its dimension is measured by embedding a probe string.

mod provider;

use std::sync::Arc;

use tracing::info;

pub use provider::{BedrockEmbeddings, Embeddings, GoogleEmbeddings, OllamaEmbeddings, OpenAiEmbeddings};

use crate::config::ProviderConfig;
use crate::Result;

pub const OPENAI_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const TITAN_EMBEDDING_MODEL: &str = "amazon.titan-embed-text-v1";
pub const GOOGLE_EMBEDDING_MODEL: &str = "models/embedding-001";
pub const DEFAULT_LOCAL_ENDPOINT: &str = "http://localhost:11434";
const DIMENSION_PROBE: &str = "test";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingProvider {
    OpenAi,
    Aws,
    GoogleGenAi,
    Local { model: String },
}

impl EmbeddingProvider {
    pub fn from_name(name: &str) -> Self {
        match name {
            "openai" => Self::OpenAi,
            "aws" => Self::Aws,
            "google-genai-embedding-001" => Self::GoogleGenAi,
            model => Self::Local { model: model.to_string() },
        }
    }

    /// `None` when the dimension has to be measured.
    pub fn known_dimension(&self) -> Option<usize> {
        match self {
            Self::OpenAi | Self::Aws => Some(1536),
            Self::GoogleGenAi => Some(768),
            Self::Local { .. } => None,
        }
    }

    pub fn build(&self, config: &ProviderConfig) -> Result<Arc<dyn Embeddings>> {
        let embeddings: Arc<dyn Embeddings> = match self {
            Self::OpenAi => Arc::new(OpenAiEmbeddings::new(config.openai_base_url(), config.require_openai_key()?, OPENAI_EMBEDDING_MODEL)?),
            Self::Aws => Arc::new(BedrockEmbeddings::new(config.aws_region(), config.require_aws_token()?, TITAN_EMBEDDING_MODEL)?),
            Self::GoogleGenAi => Arc::new(GoogleEmbeddings::new(config.require_google_key()?, GOOGLE_EMBEDDING_MODEL)?),
            Self::Local { model } => {
                let endpoint = config.ollama_base_url.as_deref().unwrap_or(DEFAULT_LOCAL_ENDPOINT);
                Arc::new(OllamaEmbeddings::new(endpoint, model)?)
            }
        };
        Ok(embeddings)
    }

    /// Fixed dimension, or the length of the probe embedding.
    pub async fn dimension(&self, embeddings: &dyn Embeddings) -> Result<usize> {
        match self.known_dimension() {
            Some(dim) => Ok(dim),
            None => Ok(embeddings.embed_query(DIMENSION_PROBE).await?.len()),
        }
    }
}

pub async fn load_embedding_model(name: &str, config: &ProviderConfig) -> Result<(Arc<dyn Embeddings>, usize)> {
    let provider = EmbeddingProvider::from_name(name);
    let embeddings = provider.build(config)?;
    let dimension = provider.dimension(embeddings.as_ref()).await?;
    match &provider {
        EmbeddingProvider::OpenAi => info!("Embedding: Using OpenAI"),
        EmbeddingProvider::Aws => info!("Embedding: Using AWS"),
        EmbeddingProvider::GoogleGenAi => info!("Embedding: Using Google Generative AI Embeddings"),
        EmbeddingProvider::Local { model } => info!("Embedding: Using local model {model}, dim {dimension}"),
    }
    Ok((embeddings, dimension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ProbeEmbedder {
        dim: usize,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Embeddings for ProbeEmbedder {
        async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            self.seen.lock().unwrap().push(text.to_string());
            Ok(vec![0.1; self.dim])
        }

        fn model_name(&self) -> &str { "probe" }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embeddings for FailingEmbedder {
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::Embedding("model 'nope' not found".to_string()))
        }

        fn model_name(&self) -> &str { "nope" }
    }

    #[test]
    fn test_named_providers_have_fixed_dimensions() {
        assert_eq!(EmbeddingProvider::from_name("openai").known_dimension(), Some(1536));
        assert_eq!(EmbeddingProvider::from_name("aws").known_dimension(), Some(1536));
        assert_eq!(EmbeddingProvider::from_name("google-genai-embedding-001").known_dimension(), Some(768));
        assert_eq!(
            EmbeddingProvider::from_name("sentence-transformers/all-MiniLM-L6-v2"),
            EmbeddingProvider::Local { model: "sentence-transformers/all-MiniLM-L6-v2".into() }
        );
    }

    #[tokio::test]
    async fn test_local_dimension_measured_from_probe() {
        let embedder = ProbeEmbedder { dim: 384, seen: Mutex::new(Vec::new()) };
        let provider = EmbeddingProvider::from_name("all-minilm");
        assert_eq!(provider.dimension(&embedder).await.unwrap(), 384);
        assert_eq!(*embedder.seen.lock().unwrap(), vec!["test".to_string()]);
    }

    #[tokio::test]
    async fn test_named_dimension_skips_probe() {
        let embedder = ProbeEmbedder { dim: 3, seen: Mutex::new(Vec::new()) };
        assert_eq!(EmbeddingProvider::OpenAi.dimension(&embedder).await.unwrap(), 1536);
        assert!(embedder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_probe_error_surfaces() {
        let err = EmbeddingProvider::from_name("nope").dimension(&FailingEmbedder).await.unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[test]
    fn test_build_requires_credentials() {
        let err = EmbeddingProvider::GoogleGenAi.build(&ProviderConfig::default()).err().unwrap();
        assert!(matches!(err, Error::MissingConfig("google_api_key")));
        let local = EmbeddingProvider::from_name("nomic-embed-text").build(&ProviderConfig::default()).unwrap();
        assert_eq!(local.model_name(), "nomic-embed-text");
    }
}
