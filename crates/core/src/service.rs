use crate::config::EngineConfig;
use crate::error::{ConfigError, IngestError, LoadError, ServiceError};
use crate::ingest::{discover_documents, IndexingPipeline};
use crate::loader::DocumentLoader;
use crate::models::{DocumentListing, IngestReport, QueryRequest, QueryResult, Turn, UploadReceipt};
use crate::orchestrator::{is_safe_document_name, EngineOptions, RagEngine};
use crate::traits::{ChatModel, EmbeddingGateway, VectorIndex};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Application context: the documents directory, the index and the engine
/// that answers over them. The outer boundary (CLI, HTTP) talks to this.
pub struct DocumentService<E: ?Sized, V: ?Sized, C: ?Sized> {
    engine: RagEngine<E, V, C>,
    config: EngineConfig,
}

impl<E, V, C> DocumentService<E, V, C>
where
    E: EmbeddingGateway + ?Sized,
    V: VectorIndex + ?Sized,
    C: ChatModel + ?Sized,
{
    /// Creates the documents directory and the index if they are missing.
    pub async fn open(
        documents_dir: impl Into<PathBuf>,
        config: EngineConfig,
        embedder: Arc<E>,
        index: Arc<V>,
        chat: Arc<C>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        if embedder.dimensions() != config.dimension {
            return Err(ConfigError::Invalid(format!(
                "embedder produces {} dimensions but the index expects {}",
                embedder.dimensions(),
                config.dimension
            ))
            .into());
        }

        let documents_dir = documents_dir.into();
        tokio::fs::create_dir_all(&documents_dir).await?;

        let spec = config.index_spec();
        index.ensure_index(&spec).await?;
        info!(
            index = %spec.name,
            dimension = spec.dimension,
            metric = spec.metric.as_str(),
            dir = %documents_dir.display(),
            "document service ready"
        );

        let pipeline = IndexingPipeline::new(
            DocumentLoader::new(config.ingestion.clone()),
            embedder,
            index,
            config.namespace.clone(),
        )
        .with_batching(config.embed_batch_size, config.embed_concurrency);

        let options = EngineOptions {
            top_k: config.top_k,
            scope_policy: config.scope_policy,
            condense_question: config.condense_question,
        };

        Ok(Self {
            engine: RagEngine::new(pipeline, chat, documents_dir, options),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn documents_dir(&self) -> &Path {
        self.engine.documents_dir()
    }

    pub fn engine(&self) -> &RagEngine<E, V, C> {
        &self.engine
    }

    /// Indexes everything already in the documents directory.
    pub async fn ingest_existing(&self) -> Result<IngestReport, ServiceError> {
        let report = self
            .engine
            .pipeline()
            .ingest_directory(self.documents_dir())
            .await?;
        Ok(report)
    }

    /// Stores `bytes` as `filename` and indexes it. On failure the directory is
    /// left as it was before the call.
    pub async fn upload_document(
        &self,
        bytes: &[u8],
        filename: &str,
    ) -> Result<UploadReceipt, ServiceError> {
        let name = filename.trim();
        if !is_safe_document_name(name) {
            return Err(ServiceError::InvalidName(filename.to_string()));
        }
        if bytes.is_empty() {
            return Err(ServiceError::EmptyUpload(name.to_string()));
        }

        let path = self.documents_dir().join(name);
        if !self.engine.pipeline().options().is_supported(&path) {
            return Err(IngestError::from(LoadError::Unsupported(path)).into());
        }

        let previous = match tokio::fs::read(&path).await {
            Ok(contents) => Some(contents),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => None,
            Err(error) => return Err(error.into()),
        };
        tokio::fs::write(&path, bytes).await?;

        match self.engine.pipeline().ingest_one(&path).await {
            Ok(chunks) => Ok(UploadReceipt {
                document: name.to_string(),
                chunks,
                uploaded_at: Utc::now(),
            }),
            Err(error) => {
                warn!(document = name, reason = %error, "upload rejected");
                let cleanup = match previous {
                    Some(contents) => tokio::fs::write(&path, contents).await,
                    None => tokio::fs::remove_file(&path).await,
                };
                if let Err(cleanup_error) = cleanup {
                    warn!(path = %path.display(), reason = %cleanup_error, "could not restore documents directory");
                }
                Err(error.into())
            }
        }
    }

    pub async fn query(&self, request: &QueryRequest) -> QueryResult {
        self.engine.query(request).await
    }

    /// Supported files in the documents directory alongside the index counts.
    pub async fn list_documents(&self) -> Result<DocumentListing, ServiceError> {
        let documents: Vec<String> =
            discover_documents(self.documents_dir(), self.engine.pipeline().options())
                .iter()
                .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
                .map(str::to_string)
                .collect();

        let stats = self.engine.pipeline().index().stats(None).await?;

        Ok(DocumentListing {
            count: documents.len(),
            documents,
            vector_count: stats.total_vector_count,
            namespaces: stats.namespaces,
        })
    }

    pub async fn history(&self) -> Vec<Turn> {
        self.engine.memory().recall().await
    }

    pub async fn reset(&self) {
        self.engine.reset().await;
        info!("conversation memory cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::ChatServiceError;
    use crate::stores::InMemoryIndex;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::tempdir;

    const DIM: usize = 24;

    struct EchoChat;

    #[async_trait]
    impl ChatModel for EchoChat {
        async fn complete(&self, prompt: &str, _history: &[Turn]) -> Result<String, ChatServiceError> {
            Ok(format!("echo: {}", prompt.len()))
        }
    }

    type TestService = DocumentService<CharacterNgramEmbedder, InMemoryIndex, EchoChat>;

    fn config() -> EngineConfig {
        EngineConfig {
            dimension: DIM,
            ..EngineConfig::default()
        }
    }

    async fn open(dir: &Path) -> Result<TestService, ServiceError> {
        DocumentService::open(
            dir,
            config(),
            Arc::new(CharacterNgramEmbedder::new(DIM)),
            Arc::new(InMemoryIndex::new()),
            Arc::new(EchoChat),
        )
        .await
    }

    #[tokio::test]
    async fn open_creates_directory_and_index() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let docs = root.path().join("docs");

        let service = open(&docs).await?;

        assert!(docs.is_dir());
        let spec = service.engine().pipeline().index().spec().await;
        assert_eq!(spec.map(|spec| spec.dimension), Some(DIM));
        Ok(())
    }

    #[tokio::test]
    async fn open_rejects_embedder_with_wrong_dimension() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let result = DocumentService::open(
            root.path(),
            config(),
            Arc::new(CharacterNgramEmbedder::new(DIM + 1)),
            Arc::new(InMemoryIndex::new()),
            Arc::new(EchoChat),
        )
        .await;
        assert!(matches!(result, Err(ServiceError::Config(_))));
        Ok(())
    }

    #[tokio::test]
    async fn upload_writes_and_indexes() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let service = open(root.path()).await?;

        let receipt = service
            .upload_document(b"part,qty\nbolt,3\nnut,4\nwasher,5\n", "parts.csv")
            .await?;

        assert_eq!(receipt.document, "parts.csv");
        assert_eq!(receipt.chunks, 3);
        assert!(root.path().join("parts.csv").is_file());

        let listing = service.list_documents().await?;
        assert_eq!(listing.documents, vec!["parts.csv".to_string()]);
        assert_eq!(listing.count, 1);
        assert_eq!(listing.vector_count, 3);
        assert_eq!(listing.namespaces.get("default"), Some(&3));
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_upload_leaves_no_file() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let service = open(root.path()).await?;

        let result = service.upload_document(b"%PDF-1.4\n%broken", "broken.pdf").await;

        assert!(matches!(result, Err(ServiceError::Ingest(IngestError::Load(_)))));
        assert!(!root.path().join("broken.pdf").exists());
        assert_eq!(service.list_documents().await?.vector_count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn failed_overwrite_restores_previous_file() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let service = open(root.path()).await?;
        service.upload_document(b"original notes", "notes.txt").await?;

        let result = service.upload_document(&[0xff, 0xfe, 0x00], "notes.txt").await;

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(root.path().join("notes.txt"))?, "original notes");
        Ok(())
    }

    #[tokio::test]
    async fn reupload_replaces_previous_entries() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let service = open(root.path()).await?;
        service.upload_document(b"Old price is 10 euro.", "p.txt").await?;

        service.upload_document(b"New price is 20 euro.", "p.txt").await?;

        assert_eq!(service.list_documents().await?.vector_count, 1);
        let result = service
            .query(&QueryRequest::grounded("What is the price?", vec!["p.txt".to_string()]))
            .await;
        assert!(result.is_success(), "{:?}", result.error);
        let contents: Vec<_> = result.sources.iter().map(|source| source.content.as_str()).collect();
        assert_eq!(contents, vec!["New price is 20 euro."]);
        Ok(())
    }

    #[tokio::test]
    async fn upload_rejects_bad_input_before_touching_disk() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let service = open(root.path()).await?;

        assert!(matches!(
            service.upload_document(b"", "empty.txt").await,
            Err(ServiceError::EmptyUpload(_))
        ));
        assert!(matches!(
            service.upload_document(b"x", "../escape.txt").await,
            Err(ServiceError::InvalidName(_))
        ));
        assert!(matches!(
            service.upload_document(b"x", "archive.zip").await,
            Err(ServiceError::Ingest(IngestError::Load(LoadError::Unsupported(_))))
        ));
        assert_eq!(fs::read_dir(root.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn ingest_existing_reports_partial_failures() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        fs::write(root.path().join("good.md"), "# Title\n\nBody text.")?;
        fs::write(root.path().join("bad.pdf"), b"not a pdf")?;
        let service = open(root.path()).await?;

        let report = service.ingest_existing().await?;

        assert_eq!(report.processed, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(service.list_documents().await?.count, 2);
        Ok(())
    }

    #[tokio::test]
    async fn reset_clears_history() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let service = open(root.path()).await?;

        assert!(service.query(&QueryRequest::llm("hello")).await.is_success());
        assert_eq!(service.history().await.len(), 2);

        service.reset().await;
        assert!(service.history().await.is_empty());
        Ok(())
    }
}
