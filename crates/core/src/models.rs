use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

pub const FALLBACK_ANSWER: &str = "Sorry, I encountered an error processing your question.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Pdf,
    Tabular,
}

impl ContentType {
    pub fn from_path(path: &Path) -> Self {
        match extension_of(path).as_deref() {
            Some("pdf") => Self::Pdf,
            Some("csv") => Self::Tabular,
            _ => Self::Text,
        }
    }
}

pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<u64>,
    pub content_type: ContentType,
    pub chunk_index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    Euclidean,
    Dotproduct,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::Dotproduct => "dotproduct",
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "euclidean" => Ok(Self::Euclidean),
            "dotproduct" => Ok(Self::Dotproduct),
            other => Err(format!("unknown metric: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub chunk: Chunk,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub id: String,
    pub score: f32,
    pub chunk: Chunk,
}

/// Restricts retrieval to entries whose `metadata.source` is one of `sources`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFilter {
    pub sources: Vec<String>,
}

impl MetadataFilter {
    pub fn by_sources(sources: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        self.sources.is_empty() || self.sources.iter().any(|name| name == &metadata.source)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexStats {
    pub total_vector_count: u64,
    pub namespaces: BTreeMap<String, u64>,
}

impl IndexStats {
    pub fn namespace_count(&self, namespace: &str) -> u64 {
        self.namespaces.get(namespace).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    #[default]
    Rag,
    Llm,
}

impl FromStr for QueryMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rag" => Ok(Self::Rag),
            "llm" => Ok(Self::Llm),
            other => Err(format!("unknown query mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub documents: Vec<String>,
    #[serde(default)]
    pub mode: QueryMode,
}

impl QueryRequest {
    pub fn grounded(question: impl Into<String>, documents: Vec<String>) -> Self {
        Self {
            question: question.into(),
            documents,
            mode: QueryMode::Rag,
        }
    }

    pub fn llm(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            documents: Vec::new(),
            mode: QueryMode::Llm,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceDocument {
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl From<ScoredEntry> for SourceDocument {
    fn from(entry: ScoredEntry) -> Self {
        Self {
            content: entry.chunk.content,
            metadata: entry.chunk.metadata,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    pub query_id: Uuid,
    pub answer: String,
    pub sources: Vec<SourceDocument>,
    pub status: QueryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    pub fn success(query_id: Uuid, answer: String, sources: Vec<SourceDocument>) -> Self {
        Self {
            query_id,
            answer,
            sources,
            status: QueryStatus::Success,
            error: None,
        }
    }

    pub fn failure(query_id: Uuid, error: impl ToString) -> Self {
        Self {
            query_id,
            answer: FALLBACK_ANSWER.to_string(),
            sources: Vec::new(),
            status: QueryStatus::Error,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailedDocument {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestReport {
    pub processed: usize,
    pub chunks: usize,
    pub failed: Vec<FailedDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub allowed_extensions: Vec<String>,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1_000,
            chunk_overlap_chars: 200,
            allowed_extensions: ["pdf", "csv", "txt", "md"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl IngestionOptions {
    pub fn is_supported(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.allowed_extensions.iter().any(|allowed| allowed == &ext))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub document: String,
    pub chunks: usize,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentListing {
    pub documents: Vec<String>,
    pub count: usize,
    pub vector_count: u64,
    pub namespaces: BTreeMap<String, u64>,
}
