//! Hashing TF-IDF embedder
//!
//! Deterministic and dependency-free; the default provider and the one the
//! test suite runs against.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;

/// Bigrams count for half as much as single terms
const BIGRAM_WEIGHT: f32 = 0.5;

/// TF-IDF style embedder using the hashing trick
pub struct TfIdfEmbedder {
    dimensions: usize,
}

impl TfIdfEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Lowercase alphanumeric terms of at least two characters
    pub(crate) fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.chars().count() > 1)
            .map(String::from)
            .collect()
    }

    fn hash(feature: &str, salt: u8) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        salt.hash(&mut hasher);
        feature.hash(&mut hasher);
        hasher.finish()
    }

    /// Bucket index and sign for a feature; the sign reduces collision bias
    fn slot(&self, feature: &str) -> (usize, f32) {
        let index = (Self::hash(feature, 0) % self.dimensions as u64) as usize;
        let sign = if Self::hash(feature, 1) % 2 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }

    /// Synchronous core, shared with benches and tests
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let tokens = Self::tokenize(text);
        let mut embedding = vec![0.0_f32; self.dimensions];
        if tokens.is_empty() {
            return embedding;
        }

        let mut counts: HashMap<&str, f32> = HashMap::new();
        for token in &tokens {
            *counts.entry(token.as_str()).or_insert(0.0) += 1.0;
        }

        let doc_len = tokens.len() as f32;
        for (token, count) in counts {
            let tf = (1.0 + count / doc_len).ln();
            // Longer terms are treated as rarer
            let idf = 1.0 + token.chars().count() as f32 * 0.1;
            let (index, sign) = self.slot(token);
            embedding[index] += tf * idf * sign;
        }

        for pair in tokens.windows(2) {
            let (index, sign) = self.slot(&format!("{} {}", pair[0], pair[1]));
            embedding[index] += BIGRAM_WEIGHT * sign;
        }

        l2_normalize(&mut embedding);
        embedding
    }
}

fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

#[async_trait]
impl EmbeddingProvider for TfIdfEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn model_name(&self) -> &str {
        "tfidf"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
