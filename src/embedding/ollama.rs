//! Ollama embedding client (`POST /api/embed`)

use async_trait::async_trait;
use serde::Deserialize;

use super::{check_dimensions, http_error, EmbeddingProvider};
use crate::error::{MembankError, Result, Service};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "nomic-embed-text";
const DEFAULT_DIMENSIONS: usize = 768;

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    pub fn with_config(
        base_url: Option<String>,
        model: Option<String>,
        dimensions: Option<usize>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            dimensions: dimensions.unwrap_or(DEFAULT_DIMENSIONS),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&serde_json::json!({
                "model": self.model,
                "input": text,
            }))
            .send()
            .await
            .map_err(http_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MembankError::unavailable(
                Service::Embedding,
                format!("ollama error {}: {}", status, body),
            ));
        }

        let parsed: EmbedResponse = response.json().await.map_err(http_error)?;
        let embedding = parsed.embeddings.into_iter().next().ok_or_else(|| {
            MembankError::unavailable(Service::Embedding, "ollama returned no embeddings")
        })?;

        check_dimensions(self.dimensions, &embedding)?;
        Ok(embedding)
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(http_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(MembankError::unavailable(
                Service::Embedding,
                format!("health probe returned {}", response.status()),
            ))
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.base_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let embedder = OllamaEmbedder::with_config(None, None, None);
        assert_eq!(embedder.model_name(), DEFAULT_MODEL);
        assert_eq!(embedder.dimensions(), DEFAULT_DIMENSIONS);
        assert_eq!(embedder.endpoint().as_deref(), Some(DEFAULT_BASE_URL));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let embedder = OllamaEmbedder::with_config(Some("http://127.0.0.1:9".into()), None, None);
        let err = embedder.health_check().await.unwrap_err();
        assert!(err.is_retryable());
    }
}
