pub mod chat;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod loader;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod service;
pub mod stores;
pub mod traits;

pub use chat::{OpenAiChat, OpenAiChatConfig, DEFAULT_CHAT_MODEL};
pub use chunking::{build_chunks, normalize_whitespace, split_text, ChunkingConfig};
pub use config::{EngineConfig, ScopePolicy};
pub use embeddings::{
    CharacterNgramEmbedder, OpenAiEmbedder, OpenAiEmbedderConfig, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_EMBEDDING_MODEL,
};
pub use error::{
    ChatServiceError, ConfigError, EmbeddingServiceError, IndexError, IngestError, LoadError,
    OrchestrationError, ServiceError,
};
pub use extractor::{LopdfExtractor, PageText, PdfExtractor};
pub use ingest::{discover_documents, IndexingPipeline};
pub use loader::{document_name, DocumentLoader};
pub use memory::ConversationMemory;
pub use models::{
    Chunk, ChunkMetadata, ContentType, DocumentListing, FailedDocument, IndexEntry, IndexSpec,
    IndexStats, IngestReport, IngestionOptions, MetadataFilter, Metric, QueryMode, QueryRequest,
    QueryResult, QueryStatus, Role, ScoredEntry, SourceDocument, Turn, UploadReceipt,
    FALLBACK_ANSWER,
};
pub use orchestrator::{EngineOptions, RagEngine};
pub use service::DocumentService;
pub use stores::{InMemoryIndex, PineconeConfig, PineconeIndex};
pub use traits::{ChatModel, EmbeddingGateway, VectorIndex};
