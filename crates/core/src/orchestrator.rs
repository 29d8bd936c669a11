use crate::config::ScopePolicy;
use crate::error::{EmbeddingServiceError, OrchestrationError};
use crate::ingest::IndexingPipeline;
use crate::memory::ConversationMemory;
use crate::models::{
    MetadataFilter, QueryMode, QueryRequest, QueryResult, Role, ScoredEntry, SourceDocument, Turn,
};
use crate::traits::{ChatModel, EmbeddingGateway, VectorIndex};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    LlmOnly,
    Grounded(Vec<String>),
}

fn select_route(request: &QueryRequest) -> Route {
    if request.mode == QueryMode::Llm || request.documents.is_empty() {
        return Route::LlmOnly;
    }

    let mut names: Vec<String> = Vec::new();
    for name in &request.documents {
        let name = name.trim().to_string();
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    }

    if names.is_empty() {
        Route::LlmOnly
    } else {
        Route::Grounded(names)
    }
}

pub(crate) fn is_safe_document_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

#[derive(Debug, Default)]
struct Scope {
    present: Vec<(String, PathBuf)>,
    failures: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub top_k: usize,
    pub scope_policy: ScopePolicy,
    pub condense_question: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            top_k: 3,
            scope_policy: ScopePolicy::FilterIndexed,
            condense_question: true,
        }
    }
}

/// Answers questions, optionally grounded in named documents, and threads the
/// conversation through [`ConversationMemory`].
pub struct RagEngine<E: ?Sized, V: ?Sized, C: ?Sized> {
    pipeline: IndexingPipeline<E, V>,
    chat: Arc<C>,
    memory: ConversationMemory,
    documents_dir: PathBuf,
    options: EngineOptions,
}

impl<E, V, C> RagEngine<E, V, C>
where
    E: EmbeddingGateway + ?Sized,
    V: VectorIndex + ?Sized,
    C: ChatModel + ?Sized,
{
    pub fn new(
        pipeline: IndexingPipeline<E, V>,
        chat: Arc<C>,
        documents_dir: impl Into<PathBuf>,
        options: EngineOptions,
    ) -> Self {
        Self {
            pipeline,
            chat,
            memory: ConversationMemory::new(),
            documents_dir: documents_dir.into(),
            options,
        }
    }

    pub fn pipeline(&self) -> &IndexingPipeline<E, V> {
        &self.pipeline
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn documents_dir(&self) -> &Path {
        &self.documents_dir
    }

    pub async fn reset(&self) {
        self.memory.reset().await;
    }

    /// Never fails: errors become a fallback answer with the detail in `error`.
    pub async fn query(&self, request: &QueryRequest) -> QueryResult {
        let query_id = Uuid::new_v4();
        let span = info_span!("query", %query_id, mode = ?request.mode);

        async {
            match self.answer(request).await {
                Ok((answer, sources)) => {
                    info!(sources = sources.len(), "query answered");
                    QueryResult::success(query_id, answer, sources)
                }
                Err(failure) => {
                    error!(error = %failure, "query failed");
                    QueryResult::failure(query_id, failure)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn answer(
        &self,
        request: &QueryRequest,
    ) -> Result<(String, Vec<SourceDocument>), OrchestrationError> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(OrchestrationError::EmptyQuestion);
        }

        let history = self.memory.recall().await;

        let (answer, sources) = match select_route(request) {
            Route::LlmOnly => {
                debug!("answering without retrieval");
                let answer = self.chat.complete(question, &history).await?;
                (answer, Vec::new())
            }
            Route::Grounded(names) => {
                let scope = self.resolve_scope(&names).await?;
                let standalone = self.standalone_question(question, &history).await?;
                let vector = self.embed_question(&standalone).await?;
                let filter = self.prepare_scope(scope, &vector).await?;

                let hits = self
                    .pipeline
                    .index()
                    .query(&vector, self.options.top_k, self.pipeline.namespace(), Some(&filter))
                    .await?;
                debug!(hits = hits.len(), "retrieved context");

                let prompt = build_prompt(&standalone, &hits);
                let answer = self.chat.complete(&prompt, &history).await?;
                (answer, hits.into_iter().map(SourceDocument::from).collect())
            }
        };

        self.memory.record(question, answer.clone()).await;
        Ok((answer, sources))
    }

    async fn standalone_question(
        &self,
        question: &str,
        history: &[Turn],
    ) -> Result<String, OrchestrationError> {
        if !self.options.condense_question || history.is_empty() {
            return Ok(question.to_string());
        }

        let rewritten = self.chat.complete(&condense_prompt(question, history), &[]).await?;
        let rewritten = rewritten.trim();
        debug!(standalone = rewritten, "condensed follow-up question");
        Ok(if rewritten.is_empty() {
            question.to_string()
        } else {
            rewritten.to_string()
        })
    }

    async fn embed_question(&self, question: &str) -> Result<Vec<f32>, OrchestrationError> {
        let vectors = self.pipeline.embedder().embed(&[question.to_string()]).await?;
        let got = vectors.len();
        vectors
            .into_iter()
            .next()
            .filter(|_| got == 1)
            .ok_or(OrchestrationError::Embedding(EmbeddingServiceError::CountMismatch {
                expected: 1,
                got,
            }))
    }

    /// Splits the requested names into files present in the documents
    /// directory and failures. Fails when none is present.
    async fn resolve_scope(&self, names: &[String]) -> Result<Scope, OrchestrationError> {
        let mut scope = Scope::default();

        for name in names {
            if !is_safe_document_name(name) {
                scope.failures.push(format!("{name}: invalid document name"));
                continue;
            }

            let path = self.documents_dir.join(name);
            let present = match tokio::fs::metadata(&path).await {
                Ok(metadata) => metadata.is_file(),
                Err(_) => false,
            };
            if present {
                scope.present.push((name.clone(), path));
            } else {
                scope.failures.push(format!("{name}: document not found"));
            }
        }

        if scope.present.is_empty() {
            return Err(OrchestrationError::NoGroundingDocuments(scope.failures.join("; ")));
        }

        debug!(
            present = scope.present.len(),
            failed = scope.failures.len(),
            "resolved requested documents"
        );
        Ok(scope)
    }

    /// Makes sure the present documents are indexed and returns the filter
    /// restricting retrieval to the ones that are.
    async fn prepare_scope(
        &self,
        scope: Scope,
        vector: &[f32],
    ) -> Result<MetadataFilter, OrchestrationError> {
        let Scope { present, mut failures } = scope;
        let mut available: Vec<String> = Vec::new();
        let mut to_ingest: Vec<(String, PathBuf)> = Vec::new();

        for (name, path) in present {
            let reindex = match self.options.scope_policy {
                ScopePolicy::AlwaysReindex => true,
                ScopePolicy::FilterIndexed => !self.is_indexed(&name, vector).await?,
            };

            if reindex {
                to_ingest.push((name, path));
            } else {
                available.push(name);
            }
        }

        if !to_ingest.is_empty() {
            let paths: Vec<PathBuf> = to_ingest.iter().map(|(_, path)| path.clone()).collect();
            let report = self.pipeline.ingest_named(&paths).await;
            info!(
                processed = report.processed,
                failed = report.failed.len(),
                "indexed requested documents"
            );

            for (name, path) in to_ingest {
                match report.failed.iter().find(|failed| failed.path == path) {
                    Some(failed) => failures.push(format!("{name}: {}", failed.reason)),
                    None => available.push(name),
                }
            }
        }

        if available.is_empty() {
            return Err(OrchestrationError::NoGroundingDocuments(failures.join("; ")));
        }

        Ok(MetadataFilter::by_sources(available))
    }

    async fn is_indexed(&self, name: &str, vector: &[f32]) -> Result<bool, OrchestrationError> {
        let probe = MetadataFilter::by_sources([name]);
        let hits = self
            .pipeline
            .index()
            .query(vector, 1, self.pipeline.namespace(), Some(&probe))
            .await?;
        Ok(!hits.is_empty())
    }
}

fn render_history(history: &[Turn]) -> String {
    history
        .iter()
        .map(|turn| match turn.role {
            Role::Human => format!("Human: {}", turn.content),
            Role::Assistant => format!("Assistant: {}", turn.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn condense_prompt(question: &str, history: &[Turn]) -> String {
    format!(
        "Given the following conversation and a follow up question, rephrase the follow up \
         question to be a standalone question, in its original language.\n\n\
         Chat History:\n{}\nFollow Up Input: {question}\nStandalone question:",
        render_history(history)
    )
}

fn build_prompt(question: &str, hits: &[ScoredEntry]) -> String {
    let context = hits
        .iter()
        .map(|hit| {
            let metadata = &hit.chunk.metadata;
            let mut location = metadata.source.clone();
            if let Some(page) = metadata.page {
                location.push_str(&format!(", page {page}"));
            }
            if let Some(row) = metadata.row {
                location.push_str(&format!(", row {row}"));
            }
            format!("[{location}]\n{}", hit.chunk.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Use the following pieces of context to answer the question at the end. If you don't \
         know the answer, just say that you don't know, don't try to make up an answer.\n\n\
         {context}\n\nQuestion: {question}\nHelpful Answer:"
    )
}
