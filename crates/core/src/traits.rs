use crate::error::{ChatServiceError, EmbeddingServiceError, IndexError};
use crate::models::{IndexEntry, IndexSpec, IndexStats, MetadataFilter, ScoredEntry, Turn};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    fn dimensions(&self) -> usize;

    /// `result[i]` is the vector for `texts[i]`.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingServiceError>;
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn ensure_index(&self, spec: &IndexSpec) -> Result<(), IndexError>;

    async fn upsert(&self, entries: &[IndexEntry], namespace: &str) -> Result<usize, IndexError>;

    /// At most `k` matches, best first.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        namespace: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredEntry>, IndexError>;

    async fn stats(&self, namespace: Option<&str>) -> Result<IndexStats, IndexError>;
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, prompt: &str, history: &[Turn]) -> Result<String, ChatServiceError>;
}

#[async_trait]
impl<T: EmbeddingGateway + ?Sized> EmbeddingGateway for Arc<T> {
    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
        (**self).embed(texts).await
    }
}

#[async_trait]
impl<T: VectorIndex + ?Sized> VectorIndex for Arc<T> {
    async fn ensure_index(&self, spec: &IndexSpec) -> Result<(), IndexError> {
        (**self).ensure_index(spec).await
    }

    async fn upsert(&self, entries: &[IndexEntry], namespace: &str) -> Result<usize, IndexError> {
        (**self).upsert(entries, namespace).await
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        namespace: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredEntry>, IndexError> {
        (**self).query(vector, k, namespace, filter).await
    }

    async fn stats(&self, namespace: Option<&str>) -> Result<IndexStats, IndexError> {
        (**self).stats(namespace).await
    }
}

#[async_trait]
impl<T: ChatModel + ?Sized> ChatModel for Arc<T> {
    async fn complete(&self, prompt: &str, history: &[Turn]) -> Result<String, ChatServiceError> {
        (**self).complete(prompt, history).await
    }
}
