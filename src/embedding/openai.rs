//! OpenAI-compatible embedding client
//!
//! Works with OpenAI, OpenRouter, Azure OpenAI and other APIs exposing
//! `POST {base_url}/embeddings`.

use async_trait::async_trait;

use super::{check_dimensions, http_error, EmbeddingProvider};
use crate::error::{MembankError, Result, Service};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_DIMENSIONS: usize = 1536;

pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder with default settings
    pub fn new(api_key: String) -> Self {
        Self::with_config(api_key, None, None, None)
    }

    /// Create a new embedder for any OpenAI-compatible endpoint
    pub fn with_config(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        dimensions: Option<usize>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
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
impl EmbeddingProvider for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "input": text,
                "model": self.model,
            }))
            .send()
            .await
            .map_err(http_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MembankError::unavailable(
                Service::Embedding,
                format!("embedding API error {}: {}", status, body),
            ));
        }

        let data: serde_json::Value = response.json().await.map_err(http_error)?;
        let embedding: Vec<f32> = data["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| {
                MembankError::unavailable(Service::Embedding, "invalid response format")
            })?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        check_dimensions(self.dimensions, &embedding)?;
        Ok(embedding)
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
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
        let embedder = OpenAIEmbedder::new("sk-test".into());
        assert_eq!(embedder.model_name(), DEFAULT_MODEL);
        assert_eq!(embedder.dimensions(), DEFAULT_DIMENSIONS);
        assert_eq!(embedder.endpoint().as_deref(), Some(DEFAULT_BASE_URL));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let embedder = OpenAIEmbedder::with_config(
            "key".into(),
            Some("https://openrouter.ai/api/v1/".into()),
            Some("openai/text-embedding-3-small".into()),
            Some(512),
        );
        assert_eq!(embedder.endpoint().as_deref(), Some("https://openrouter.ai/api/v1"));
        assert_eq!(embedder.dimensions(), 512);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let embedder = OpenAIEmbedder::with_config(
            "key".into(),
            Some("http://127.0.0.1:9".into()),
            None,
            None,
        );
        let err = embedder.embed("hello").await.unwrap_err();
        assert_eq!(err.service(), Some(Service::Embedding));
    }
}
