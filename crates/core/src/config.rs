use crate::chunking::ChunkingConfig;
use crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS;
use crate::error::ConfigError;
use crate::models::{IndexSpec, IngestionOptions, Metric};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How a query scoped to named documents reaches its grounding chunks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScopePolicy {
    /// Filter retrieval by `source`; ingest only documents with no indexed chunks.
    #[default]
    FilterIndexed,
    /// Re-ingest every requested document before each scoped query, then filter.
    AlwaysReindex,
}

impl FromStr for ScopePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "filter_indexed" | "filter" => Ok(Self::FilterIndexed),
            "always_reindex" | "reindex" => Ok(Self::AlwaysReindex),
            other => Err(format!("unknown scope policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub index_name: String,
    pub namespace: String,
    pub dimension: usize,
    pub metric: Metric,
    pub top_k: usize,
    pub scope_policy: ScopePolicy,
    pub condense_question: bool,
    pub embed_batch_size: usize,
    pub embed_concurrency: usize,
    pub ingestion: IngestionOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index_name: "document-store".to_string(),
            namespace: "default".to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSIONS,
            metric: Metric::Cosine,
            top_k: 3,
            scope_policy: ScopePolicy::FilterIndexed,
            condense_question: true,
            embed_batch_size: 64,
            embed_concurrency: 4,
            ingestion: IngestionOptions::default(),
        }
    }
}

impl EngineConfig {
    pub fn index_spec(&self) -> IndexSpec {
        IndexSpec {
            name: self.index_name.clone(),
            dimension: self.dimension,
            metric: self.metric,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.index_name.trim().is_empty() {
            return Err(ConfigError::Invalid("index_name must not be empty".to_string()));
        }
        if self.dimension == 0 {
            return Err(ConfigError::Invalid("dimension must be greater than zero".to_string()));
        }
        if self.top_k == 0 {
            return Err(ConfigError::Invalid("top_k must be greater than zero".to_string()));
        }
        if self.embed_batch_size == 0 || self.embed_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "embed_batch_size and embed_concurrency must be greater than zero".to_string(),
            ));
        }
        if self.ingestion.allowed_extensions.is_empty() {
            return Err(ConfigError::Invalid("allowed_extensions must not be empty".to_string()));
        }
        ChunkingConfig::from(&self.ingestion)
            .validate()
            .map_err(|error| ConfigError::Invalid(error.to_string()))
    }
}
