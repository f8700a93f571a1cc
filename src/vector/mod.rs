//! Vector index abstraction
//!
//! The index is a disposable projection of memory embeddings keyed by memory
//! ID. Persistence stays the source of truth; the index is never read for
//! anything but candidate IDs and scores.

mod sqlite;

pub use sqlite::SqliteVectorIndex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A nearest-neighbour hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    /// Similarity in [0, 1]
    pub score: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the vector stored under `id`
    async fn upsert(&self, id: &str, vector: &[f32]) -> Result<()>;

    /// Remove the vector stored under `id`; absent IDs are not an error
    async fn delete(&self, id: &str) -> Result<()>;

    /// Up to `top_k` matches scoring at least `min_score`, best first
    async fn query(&self, vector: &[f32], top_k: usize, min_score: f32) -> Result<Vec<VectorMatch>>;

    async fn health_check(&self) -> Result<()>;

    async fn list_collections(&self) -> Result<Vec<String>>;
}

/// Serialize an embedding as little-endian f32 bytes
pub(crate) fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Inverse of [`encode_vector`]; trailing partial floats are ignored
pub(crate) fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Order matches best first, ties by ID ascending
pub(crate) fn sort_matches(matches: &mut [VectorMatch]) {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_encoding() {
        let vector = vec![0.25_f32, -1.5, 3.0];
        let bytes = encode_vector(&vector);
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode_vector(&bytes), vector);
    }

    #[test]
    fn test_sort_matches_tie_break() {
        let mut matches = vec![
            VectorMatch { id: "b".into(), score: 0.5 },
            VectorMatch { id: "c".into(), score: 0.9 },
            VectorMatch { id: "a".into(), score: 0.5 },
        ];
        sort_matches(&mut matches);
        let ids: Vec<_> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
