//! Embedding providers
//!
//! Supports multiple embedding backends:
//! - TF-IDF hashing embedder (no external dependencies, deterministic)
//! - OpenAI-compatible API - requires `openai` feature
//! - Ollama local server - requires `ollama` feature
//!
//! Transport failures surface as `ServiceUnavailable { service: embedding }`.

#[cfg(feature = "ollama")]
mod ollama;
#[cfg(feature = "openai")]
mod openai;
mod tfidf;

#[cfg(feature = "ollama")]
pub use ollama::OllamaEmbedder;
#[cfg(feature = "openai")]
pub use openai::OpenAIEmbedder;
pub use tfidf::TfIdfEmbedder;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::{MembankError, Result};

/// Produces fixed-dimension vectors for text
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Cheap reachability probe
    async fn health_check(&self) -> Result<()>;

    /// Get model name
    fn model_name(&self) -> &str;

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Remote endpoint, if the provider has one
    fn endpoint(&self) -> Option<String> {
        None
    }
}

/// Create an embedder from configuration
///
/// Available providers depend on enabled features:
/// - `"tfidf"`: Always available
/// - `"openai"`: Requires `openai` feature and an API key
/// - `"ollama"`: Requires `ollama` feature
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "tfidf" => Ok(Arc::new(TfIdfEmbedder::new(config.dimensions))),
        #[cfg(feature = "openai")]
        "openai" => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                MembankError::Config(
                    "OPENAI_API_KEY required when MEMBANK_EMBEDDING_PROVIDER=openai".to_string(),
                )
            })?;
            Ok(Arc::new(OpenAIEmbedder::with_config(
                api_key,
                config.base_url.clone(),
                config.model.clone(),
                Some(config.dimensions),
            )))
        }
        #[cfg(not(feature = "openai"))]
        "openai" => Err(MembankError::Config(
            "OpenAI embeddings require the 'openai' feature".to_string(),
        )),
        #[cfg(feature = "ollama")]
        "ollama" => Ok(Arc::new(OllamaEmbedder::with_config(
            config.base_url.clone(),
            config.model.clone(),
            Some(config.dimensions),
        ))),
        #[cfg(not(feature = "ollama"))]
        "ollama" => Err(MembankError::Config(
            "Ollama embeddings require the 'ollama' feature".to_string(),
        )),
        _ => Err(MembankError::Config(format!(
            "Unknown embedding provider: '{}'. Use 'tfidf', 'openai' or 'ollama'",
            config.provider
        ))),
    }
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Reject vectors whose length differs from what the provider advertises
pub(crate) fn check_dimensions(expected: usize, embedding: &[f32]) -> Result<()> {
    if embedding.len() != expected {
        return Err(MembankError::unavailable(
            crate::error::Service::Embedding,
            format!(
                "embedding dimensions mismatch: expected {}, got {}",
                expected,
                embedding.len()
            ),
        ));
    }
    Ok(())
}

#[cfg(any(feature = "openai", feature = "ollama"))]
pub(crate) fn http_error(err: reqwest::Error) -> MembankError {
    MembankError::unavailable(crate::error::Service::Embedding, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_create_embedder() {
        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.model_name(), "tfidf");
        assert_eq!(embedder.dimensions(), 384);
        assert!(embedder.endpoint().is_none());

        let unknown = EmbeddingConfig {
            provider: "word2vec".into(),
            ..Default::default()
        };
        assert!(create_embedder(&unknown).is_err());
    }

    #[test]
    fn test_dimension_mismatch_is_unavailable() {
        let err = check_dimensions(3, &[0.0, 1.0]).unwrap_err();
        assert!(err.is_retryable());
    }
}
