use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("document not found: {0}")]
    NotFound(PathBuf),

    #[error("document is empty: {0}")]
    Empty(PathBuf),

    #[error("unsupported document type: {0}")]
    Unsupported(PathBuf),

    #[error("corrupt document {path}: {details}")]
    Corrupt { path: PathBuf, details: String },

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),
}

impl LoadError {
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::Io { path, .. } | Self::Corrupt { path, .. } => Some(path),
            Self::NotFound(path) | Self::Empty(path) | Self::Unsupported(path) => Some(path),
            Self::InvalidChunkConfig(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum EmbeddingServiceError {
    #[error("embedding request timed out: {0}")]
    Timeout(String),

    #[error("embedding http error: {0}")]
    Http(reqwest::Error),

    #[error("embedding service returned {status}: {details}")]
    Service { status: u16, details: String },

    #[error("embedding response had {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    #[error("embedding dimension {got} != {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("embedding service not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for EmbeddingServiceError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else {
            Self::Http(error)
        }
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid response from {backend}: {details}")]
    Service { backend: String, details: String },

    #[error("index http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error(
        "index {name} exists with dimension {found_dimension}/{found_metric}, \
         requested {requested_dimension}/{requested_metric}"
    )]
    ConfigMismatch {
        name: String,
        requested_dimension: usize,
        requested_metric: String,
        found_dimension: usize,
        found_metric: String,
    },

    #[error("vector dimension {got} != index dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("index not available yet: {0}")]
    NotReady(String),
}

#[derive(Debug, Error)]
pub enum ChatServiceError {
    #[error("chat request timed out: {0}")]
    Timeout(String),

    #[error("chat http error: {0}")]
    Http(reqwest::Error),

    #[error("chat service returned {status}: {details}")]
    Service { status: u16, details: String },

    #[error("chat response had no content")]
    EmptyResponse,

    #[error("chat service not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for ChatServiceError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else {
            Self::Http(error)
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingServiceError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("loader task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("none of the requested documents is available: {0}")]
    NoGroundingDocuments(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingServiceError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Chat(#[from] ChatServiceError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid document name: {0}")]
    InvalidName(String),

    #[error("uploaded document is empty: {0}")]
    EmptyUpload(String),
}
