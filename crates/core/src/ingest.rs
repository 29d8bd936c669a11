use crate::chunking::make_chunk_id;
use crate::error::{EmbeddingServiceError, IngestError};
use crate::loader::DocumentLoader;
use crate::models::{FailedDocument, IndexEntry, IngestReport, IngestionOptions};
use crate::traits::{EmbeddingGateway, VectorIndex};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Supported files directly inside `folder`, sorted by path.
pub fn discover_documents(folder: &Path, options: &IngestionOptions) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| options.is_supported(path))
        .collect();

    files.sort_unstable();
    files
}

pub struct IndexingPipeline<E: ?Sized, V: ?Sized> {
    loader: DocumentLoader,
    embedder: Arc<E>,
    index: Arc<V>,
    namespace: String,
    batch_size: usize,
    concurrency: usize,
}

impl<E, V> IndexingPipeline<E, V>
where
    E: EmbeddingGateway + ?Sized,
    V: VectorIndex + ?Sized,
{
    pub fn new(loader: DocumentLoader, embedder: Arc<E>, index: Arc<V>, namespace: impl Into<String>) -> Self {
        Self {
            loader,
            embedder,
            index,
            namespace: namespace.into(),
            batch_size: 64,
            concurrency: 4,
        }
    }

    pub fn with_batching(mut self, batch_size: usize, concurrency: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn embedder(&self) -> &Arc<E> {
        &self.embedder
    }

    pub fn index(&self) -> &Arc<V> {
        &self.index
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn options(&self) -> &IngestionOptions {
        self.loader.options()
    }

    /// Loads, embeds and upserts one document. Failures propagate.
    pub async fn ingest_one(&self, path: &Path) -> Result<usize, IngestError> {
        let loader = self.loader.clone();
        let owned = path.to_path_buf();
        let chunks = tokio::task::spawn_blocking(move || loader.load(&owned)).await??;

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        let vectors = self.embed_batched(texts).await?;

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry {
                id: make_chunk_id(&chunk.metadata.source, chunk.metadata.chunk_index),
                vector,
                chunk,
            })
            .collect();

        let upserted = self.index.upsert(&entries, &self.namespace).await?;
        info!(path = %path.display(), chunks = entries.len(), upserted, "ingested document");
        Ok(entries.len())
    }

    /// Ingests every supported file in `dir`; one bad file does not stop the rest.
    pub async fn ingest_directory(&self, dir: &Path) -> Result<IngestReport, IngestError> {
        if !dir.is_dir() {
            return Err(IngestError::InvalidArgument(format!(
                "not a directory: {}",
                dir.display()
            )));
        }

        let files = discover_documents(dir, self.loader.options());
        if files.is_empty() {
            warn!(dir = %dir.display(), "no supported documents found");
            return Ok(IngestReport::default());
        }

        let report = self.ingest_named(&files).await;
        info!(
            dir = %dir.display(),
            processed = report.processed,
            failed = report.failed.len(),
            "ingested directory"
        );
        Ok(report)
    }

    /// Same partial-failure policy as [`Self::ingest_directory`], for an explicit list.
    pub async fn ingest_named(&self, paths: &[PathBuf]) -> IngestReport {
        let mut report = IngestReport::default();

        for path in paths {
            match self.ingest_one(path).await {
                Ok(count) => {
                    report.processed += 1;
                    report.chunks += count;
                }
                Err(error) => {
                    warn!(path = %path.display(), reason = %error, "skipped document");
                    report.failed.push(FailedDocument {
                        path: path.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        report
    }

    async fn embed_batched(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
        let expected = texts.len();
        let batches: Vec<Vec<String>> = texts.chunks(self.batch_size).map(<[String]>::to_vec).collect();
        let embedder = &self.embedder;

        let vectors: Vec<Vec<f32>> = stream::iter(batches)
            .map(|batch| async move {
                let vectors = embedder.embed(&batch).await?;
                if vectors.len() != batch.len() {
                    return Err(EmbeddingServiceError::CountMismatch {
                        expected: batch.len(),
                        got: vectors.len(),
                    });
                }
                Ok(vectors)
            })
            .buffered(self.concurrency)
            .try_concat()
            .await?;

        if vectors.len() != expected {
            return Err(EmbeddingServiceError::CountMismatch {
                expected,
                got: vectors.len(),
            });
        }

        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::{IndexSpec, Metric};
    use crate::stores::InMemoryIndex;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    const DIM: usize = 16;

    struct CountingEmbedder {
        inner: CharacterNgramEmbedder,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingGateway for CountingEmbedder {
        fn dimensions(&self) -> usize {
            self.inner.dimensions
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(texts).await
        }
    }

    async fn pipeline() -> IndexingPipeline<CountingEmbedder, InMemoryIndex> {
        let index = InMemoryIndex::new();
        index
            .ensure_index(&IndexSpec {
                name: "test".to_string(),
                dimension: DIM,
                metric: Metric::Cosine,
            })
            .await
            .expect("create index");

        let embedder = CountingEmbedder {
            inner: CharacterNgramEmbedder::new(DIM),
            calls: AtomicUsize::new(0),
        };
        IndexingPipeline::new(
            DocumentLoader::new(IngestionOptions::default()),
            Arc::new(embedder),
            Arc::new(index),
            "default",
        )
    }

    #[test]
    fn discovery_is_flat_and_filters_extensions() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("nested");
        fs::create_dir(&nested)?;
        fs::write(dir.path().join("b.txt"), "b")?;
        fs::write(dir.path().join("a.csv"), "x\n1")?;
        fs::write(dir.path().join("skip.zip"), "zip")?;
        fs::write(nested.join("deep.txt"), "deep")?;

        let files = discover_documents(dir.path(), &IngestionOptions::default());
        let names: Vec<_> = files
            .iter()
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
            .collect();
        assert_eq!(names, vec!["a.csv", "b.txt"]);
        Ok(())
    }

    #[tokio::test]
    async fn ingest_one_upserts_every_chunk() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("a.csv");
        fs::write(&path, "item,qty\nbolt,3\nnut,4\nwasher,5\n")?;

        let pipeline = pipeline().await;
        let count = pipeline.ingest_one(&path).await?;

        assert_eq!(count, 3);
        let stats = pipeline.index().stats(None).await?;
        assert_eq!(stats.namespace_count("default"), 3);
        Ok(())
    }

    #[tokio::test]
    async fn reingesting_unchanged_document_does_not_duplicate() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("notes.txt");
        fs::write(&path, "first paragraph\n\nsecond paragraph")?;

        let pipeline = pipeline().await;
        let first = pipeline.ingest_one(&path).await?;
        pipeline.ingest_one(&path).await?;

        assert_eq!(pipeline.index().stats(None).await?.total_vector_count, first as u64);
        Ok(())
    }

    #[tokio::test]
    async fn embedding_is_batched() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("rows.csv");
        fs::write(&path, "n\n1\n2\n3\n4\n5\n")?;

        let pipeline = pipeline().await.with_batching(2, 2);
        assert_eq!(pipeline.ingest_one(&path).await?, 5);
        assert_eq!(pipeline.embedder().calls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn ingest_one_propagates_load_failure() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4\n%broken")?;

        let pipeline = pipeline().await;
        let result = pipeline.ingest_one(&path).await;
        assert!(matches!(result, Err(IngestError::Load(_))));
        assert_eq!(pipeline.index().stats(None).await?.total_vector_count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn directory_ingest_continues_past_bad_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("broken.pdf"), b"%PDF-1.4\n%broken")?;
        fs::write(dir.path().join("empty.txt"), "")?;
        fs::write(dir.path().join("good.txt"), "useful content")?;

        let report = pipeline().await.ingest_directory(dir.path()).await?;

        assert_eq!(report.processed, 1);
        assert_eq!(report.chunks, 1);
        assert_eq!(report.failed.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn named_ingest_reports_missing_documents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let present = dir.path().join("present.txt");
        fs::write(&present, "here")?;
        let missing = dir.path().join("missing.txt");

        let report = pipeline().await.ingest_named(&[present, missing.clone()]).await;

        assert_eq!(report.processed, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, missing);
        Ok(())
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let result = pipeline().await.ingest_directory(Path::new("/no/such/dir")).await;
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
    }
}
