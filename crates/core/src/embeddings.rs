use crate::error::{ConfigError, EmbeddingServiceError};
use crate::traits::EmbeddingGateway;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Local hashing embedder: character trigrams folded into a fixed number of
/// buckets and L2-normalized. Needs no network.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingGateway for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiEmbedderConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    pub timeout: Duration,
}

impl OpenAiEmbedderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingEnv("OPENAI_API_KEY"))?;

        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            if !base_url.trim().is_empty() {
                config.base_url = base_url.trim().trim_end_matches('/').to_string();
            }
        }
        Ok(config)
    }
}

pub struct OpenAiEmbedder {
    client: Client,
    config: OpenAiEmbedderConfig,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiEmbedderConfig) -> Result<Self, EmbeddingServiceError> {
        if config.api_key.is_empty() {
            return Err(EmbeddingServiceError::NotConfigured(
                "api key must not be empty".to_string(),
            ));
        }

        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
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

#[async_trait]
impl EmbeddingGateway for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(batch_size = texts.len(), model = %self.config.model, "embedding batch");

        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
            dimensions: (self.config.dimensions != DEFAULT_EMBEDDING_DIMENSIONS)
                .then_some(self.config.dimensions),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let details = response.text().await.unwrap_or_default();
            return Err(EmbeddingServiceError::Service { status, details });
        }

        let payload: EmbeddingResponse = response.json().await?;
        order_embeddings(payload.data, texts.len(), self.config.dimensions)
    }
}

fn order_embeddings(
    mut data: Vec<EmbeddingData>,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
    if data.len() != expected {
        return Err(EmbeddingServiceError::CountMismatch {
            expected,
            got: data.len(),
        });
    }

    data.sort_by_key(|item| item.index);
    data.into_iter()
        .map(|item| {
            if item.embedding.len() == dimensions {
                Ok(item.embedding)
            } else {
                Err(EmbeddingServiceError::DimensionMismatch {
                    expected: dimensions,
                    got: item.embedding.len(),
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::new(64);
        let texts = vec!["Hydraulic pressure and flow".to_string()];
        let first = embedder.embed(&texts).await.expect("local embedding");
        let second = embedder.embed(&texts).await.expect("local embedding");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn embedder_preserves_length_and_order() {
        let embedder = CharacterNgramEmbedder::new(32);
        let texts = vec!["abc".to_string(), "xyz".to_string(), "abc".to_string()];
        let vectors = embedder.embed(&texts).await.expect("local embedding");
        assert_eq!(vectors.len(), 3);
        assert!(vectors.iter().all(|vector| vector.len() == 32));
        assert_eq!(vectors[0], vectors[2]);
        assert_ne!(vectors[0], vectors[1]);
    }

    #[test]
    fn remote_embeddings_are_reordered_by_index() {
        let data = vec![
            EmbeddingData {
                index: 1,
                embedding: vec![0.0, 1.0],
            },
            EmbeddingData {
                index: 0,
                embedding: vec![1.0, 0.0],
            },
        ];
        let ordered = order_embeddings(data, 2, 2).expect("valid payload");
        assert_eq!(ordered, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn remote_embeddings_with_wrong_shape_are_rejected() {
        let short = vec![EmbeddingData {
            index: 0,
            embedding: vec![1.0],
        }];
        assert!(matches!(
            order_embeddings(short, 2, 1),
            Err(EmbeddingServiceError::CountMismatch { expected: 2, got: 1 })
        ));

        let wrong_dim = vec![EmbeddingData {
            index: 0,
            embedding: vec![1.0, 2.0, 3.0],
        }];
        assert!(matches!(
            order_embeddings(wrong_dim, 1, 2),
            Err(EmbeddingServiceError::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let result = OpenAiEmbedder::new(OpenAiEmbedderConfig::new(""));
        assert!(matches!(result, Err(EmbeddingServiceError::NotConfigured(_))));
    }
}
