//! Configuration structures with documented defaults
//!
//! Every tunable the core consults lives here and is injected at
//! construction time; call sites never carry their own literals.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Defaults applied when a request leaves a knob unset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchDefaults {
    /// Page size for searches (default: 10)
    pub limit: usize,
    /// Minimum similarity for semantic search (default: 0.5)
    pub threshold: f32,
    /// Upper bound for "list everything" reads and the vector candidate pool (default: 1000)
    pub list_all_limit: usize,
    /// Maximum number of suggestions (default: 10)
    pub suggestion_limit: usize,
    /// Page size for session listings (default: 50)
    pub session_list_limit: usize,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: 0.5,
            list_all_limit: 1000,
            suggestion_limit: 10,
            session_list_limit: 50,
        }
    }
}

/// Weights and budgets for the composite relevance score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceConfig {
    pub similarity_weight: f32,
    pub lexical_weight: f32,
    pub tag_weight: f32,
    pub recency_weight: f32,
    /// Days for the recency signal to halve
    pub recency_half_life_days: f32,
    /// Character budget of a single highlight excerpt
    pub highlight_budget: usize,
    pub max_highlights: usize,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            similarity_weight: 0.6,
            lexical_weight: 0.2,
            tag_weight: 0.1,
            recency_weight: 0.1,
            recency_half_life_days: 30.0,
            highlight_budget: 160,
            max_highlights: 3,
        }
    }
}

/// Storage mode for SQLite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StorageMode {
    #[default]
    Local,
    CloudSafe,
}

/// Configuration for the persistence layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database (":memory:" for tests)
    pub db_path: String,
    #[serde(default)]
    pub storage_mode: StorageMode,
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self {
            db_path: ":memory:".to_string(),
            storage_mode: StorageMode::Local,
        }
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider: "tfidf", "openai" or "ollama"
    pub provider: String,
    /// API key (openai)
    pub api_key: Option<String>,
    /// Endpoint base URL override
    pub base_url: Option<String>,
    /// Model name override
    pub model: Option<String>,
    /// Embedding dimensions (must match model output)
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "tfidf".to_string(),
            api_key: None,
            base_url: None,
            model: None,
            dimensions: 384,
        }
    }
}

/// Vector index identifiers, echoed by verbose health reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndexConfig {
    pub collection: String,
    pub tenant: String,
    pub database: String,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            collection: "memories".to_string(),
            tenant: "default_tenant".to_string(),
            database: "default_database".to_string(),
        }
    }
}

/// Top-level configuration for the core services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub search: SearchDefaults,
    #[serde(default)]
    pub relevance: RelevanceConfig,
    /// Upper bound for a single health probe (default: 5s)
    #[serde(with = "duration_millis", default = "default_probe_timeout")]
    pub health_probe_timeout: Duration,
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            search: SearchDefaults::default(),
            relevance: RelevanceConfig::default(),
            health_probe_timeout: default_probe_timeout(),
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Everything needed to assemble a memory bank
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankConfig {
    pub storage: StorageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_index: VectorIndexConfig,
    #[serde(default)]
    pub core: CoreConfig,
}

impl BankConfig {
    /// In-memory database with the deterministic local embedder
    pub fn in_memory() -> Self {
        Self {
            storage: StorageConfig::in_memory(),
            embedding: EmbeddingConfig::default(),
            vector_index: VectorIndexConfig::default(),
            core: CoreConfig::default(),
        }
    }
}

/// Configuration echoed by verbose health checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigReport {
    pub embedding_endpoint: Option<String>,
    pub embedding_model: String,
    pub vector_collection: String,
    pub vector_tenant: String,
    pub vector_database: String,
    pub persistence_location: String,
}

impl ConfigReport {
    pub fn new(
        embedding_endpoint: Option<String>,
        embedding_model: &str,
        vector_index: &VectorIndexConfig,
        storage: &StorageConfig,
    ) -> Self {
        Self {
            embedding_endpoint,
            embedding_model: embedding_model.to_string(),
            vector_collection: vector_index.collection.clone(),
            vector_tenant: vector_index.tenant.clone(),
            vector_database: vector_index.database.clone(),
            persistence_location: storage.db_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_defaults() {
        let defaults = SearchDefaults::default();
        assert_eq!(defaults.limit, 10);
        assert!((defaults.threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(defaults.list_all_limit, 1000);

        let relevance = RelevanceConfig::default();
        let sum = relevance.similarity_weight
            + relevance.lexical_weight
            + relevance.tag_weight
            + relevance.recency_weight;
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_core_config_partial_json() {
        let config: CoreConfig =
            serde_json::from_str(r#"{"health_probe_timeout": 250}"#).unwrap();
        assert_eq!(config.health_probe_timeout, Duration::from_millis(250));
        assert_eq!(config.search.limit, 10);
    }
}
