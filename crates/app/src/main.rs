use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand};
use doc_rag_core::{
    CharacterNgramEmbedder, ChatModel, ChatServiceError, DocumentService, EmbeddingGateway,
    EngineConfig, InMemoryIndex, OpenAiChat, OpenAiChatConfig, OpenAiEmbedder,
    OpenAiEmbedderConfig, PineconeConfig, PineconeIndex, QueryMode, QueryRequest, QueryResult,
    ScopePolicy, Turn, VectorIndex, DEFAULT_CHAT_MODEL, DEFAULT_EMBEDDING_MODEL,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Service = DocumentService<dyn EmbeddingGateway, dyn VectorIndex, dyn ChatModel>;

#[derive(Parser)]
#[command(name = "doc-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding uploaded documents.
    #[arg(long, env = "DOC_RAG_DOCUMENTS_DIR", default_value = "documents")]
    documents_dir: PathBuf,

    /// Vector index name
    #[arg(long, env = "DOC_RAG_INDEX", default_value = "document-store")]
    index_name: String,

    /// Vector index namespace
    #[arg(long, env = "DOC_RAG_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Chunks retrieved per question.
    #[arg(long, default_value_t = 3)]
    top_k: usize,

    /// `filter-indexed` or `always-reindex`.
    #[arg(long, env = "DOC_RAG_SCOPE_POLICY", default_value = "filter-indexed")]
    scope_policy: ScopePolicy,

    /// Embed follow-up questions as they are instead of rewriting them first.
    #[arg(long, default_value_t = false)]
    no_condense: bool,

    /// Use the local embedder and an in-process index; no network calls.
    #[arg(long, env = "DOC_RAG_OFFLINE", default_value_t = false)]
    offline: bool,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL")]
    openai_base_url: Option<String>,

    #[arg(long, env = "OPENAI_CHAT_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    chat_model: String,

    #[arg(long, env = "OPENAI_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pinecone_api_key: Option<String>,

    /// Data-plane host; looked up from the control plane when omitted.
    #[arg(long, env = "PINECONE_HOST")]
    pinecone_host: Option<String>,

    #[arg(long, env = "PINECONE_CLOUD", default_value = "aws")]
    pinecone_cloud: String,

    #[arg(long, env = "PINECONE_REGION", default_value = "us-east-1")]
    pinecone_region: String,
}

#[derive(Subcommand)]
enum Command {
    /// Index every supported document already in the documents directory.
    Ingest,
    /// Copy a file into the documents directory and index it.
    Upload {
        /// File to upload.
        file: PathBuf,
        /// Store under this name instead of the file's own name.
        #[arg(long)]
        name: Option<String>,
    },
    /// Ask one question.
    Query {
        question: String,
        /// Ground the answer in this document (repeatable).
        #[arg(long = "document", short = 'd')]
        documents: Vec<String>,
        /// `rag` or `llm`.
        #[arg(long, default_value = "rag")]
        mode: QueryMode,
        /// Print the full result as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List documents and index counts.
    Documents,
    /// Interactive session; `/reset` clears the conversation, `/exit` quits.
    Chat {
        #[arg(long = "document", short = 'd')]
        documents: Vec<String>,
        #[arg(long, default_value = "rag")]
        mode: QueryMode,
    },
}

/// Stand-in chat model for `--offline`: answers with the prompt it was given.
struct OfflineChat;

#[async_trait]
impl ChatModel for OfflineChat {
    async fn complete(&self, prompt: &str, _history: &[Turn]) -> Result<String, ChatServiceError> {
        Ok(format!("[offline, no chat model]\n{prompt}"))
    }
}

impl Cli {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            index_name: self.index_name.clone(),
            namespace: self.namespace.clone(),
            top_k: self.top_k,
            scope_policy: self.scope_policy,
            // OfflineChat echoes its prompt and cannot rewrite a follow-up.
            condense_question: !self.no_condense && !self.offline,
            ..EngineConfig::default()
        }
    }

    /// The offline index lives in process, so every command but `ingest`
    /// starts by filling it from the documents directory.
    fn prefills_offline_index(&self) -> bool {
        self.offline && !matches!(self.command, Command::Ingest)
    }

    async fn open_service(&self) -> anyhow::Result<Service> {
        let config = self.engine_config();

        if self.offline {
            let embedder: Arc<dyn EmbeddingGateway> =
                Arc::new(CharacterNgramEmbedder::new(config.dimension));
            let index: Arc<dyn VectorIndex> = Arc::new(InMemoryIndex::new());
            let chat: Arc<dyn ChatModel> = Arc::new(OfflineChat);
            let service = DocumentService::open(&self.documents_dir, config, embedder, index, chat).await?;

            if self.prefills_offline_index() {
                let report = service.ingest_existing().await?;
                info!(
                    processed = report.processed,
                    failed = report.failed.len(),
                    "offline index built"
                );
            }
            return Ok(service);
        }

        let openai_key = self
            .openai_api_key
            .clone()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY is required unless --offline is set"))?;
        let pinecone_key = self
            .pinecone_api_key
            .clone()
            .ok_or_else(|| anyhow!("PINECONE_API_KEY is required unless --offline is set"))?;

        let mut embedder_config = OpenAiEmbedderConfig::new(openai_key.clone());
        embedder_config.model = self.embedding_model.clone();
        embedder_config.dimensions = config.dimension;
        let mut chat_config = OpenAiChatConfig::new(openai_key);
        chat_config.model = self.chat_model.clone();
        if let Some(base_url) = &self.openai_base_url {
            embedder_config.base_url = base_url.clone();
            chat_config.base_url = base_url.clone();
        }

        let mut pinecone_config = PineconeConfig::new(pinecone_key);
        pinecone_config.host = self.pinecone_host.clone();
        pinecone_config.cloud = self.pinecone_cloud.clone();
        pinecone_config.region = self.pinecone_region.clone();

        let embedder: Arc<dyn EmbeddingGateway> = Arc::new(OpenAiEmbedder::new(embedder_config)?);
        let index: Arc<dyn VectorIndex> = Arc::new(PineconeIndex::new(pinecone_config)?);
        let chat: Arc<dyn ChatModel> = Arc::new(OpenAiChat::new(chat_config)?);

        DocumentService::open(&self.documents_dir, config, embedder, index, chat)
            .await
            .context("opening document service")
    }
}

fn print_result(result: &QueryResult) {
    println!("{}", result.answer);
    for source in &result.sources {
        let metadata = &source.metadata;
        let location = match (metadata.page, metadata.row) {
            (Some(page), _) => format!(" page={page}"),
            (None, Some(row)) => format!(" row={row}"),
            (None, None) => String::new(),
        };
        println!("  source={}{} chunk={}", metadata.source, location, metadata.chunk_index);
    }
    if let Some(error) = &result.error {
        eprintln!("query {} failed: {error}", result.query_id);
    }
}

async fn run_chat(service: &Service, documents: Vec<String>, mode: QueryMode) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "/exit" | "/quit" => break,
            "/reset" => {
                service.reset().await;
                println!("conversation cleared");
            }
            question => {
                let request = QueryRequest {
                    question: question.to_string(),
                    documents: documents.clone(),
                    mode,
                };
                print_result(&service.query(&request).await);
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        offline = cli.offline,
        started_at = %Utc::now().to_rfc3339(),
        "doc-rag boot"
    );

    let service = cli.open_service().await?;

    match cli.command {
        Command::Ingest => {
            let report = service.ingest_existing().await?;
            for failed in &report.failed {
                warn!(path = %failed.path.display(), reason = %failed.reason, "document skipped");
            }
            println!(
                "{} documents ({} chunks) ingested, {} failed, at {}",
                report.processed,
                report.chunks,
                report.failed.len(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Upload { file, name } => {
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("cannot derive a document name from {}", file.display()))?,
            };
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;

            let receipt = service.upload_document(&bytes, &name).await?;
            println!(
                "{} uploaded: {} chunks at {}",
                receipt.document,
                receipt.chunks,
                receipt.uploaded_at.to_rfc3339()
            );
        }
        Command::Query {
            question,
            documents,
            mode,
            json,
        } => {
            let result = service
                .query(&QueryRequest {
                    question,
                    documents,
                    mode,
                })
                .await;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
        }
        Command::Documents => {
            let listing = service.list_documents().await?;
            for document in &listing.documents {
                println!("{document}");
            }
            println!("documents={} vectors={}", listing.count, listing.vector_count);
            for (namespace, count) in &listing.namespaces {
                println!("  namespace={namespace} vectors={count}");
            }
        }
        Command::Chat { documents, mode } => run_chat(&service, documents, mode).await?,
    }

    Ok(())
}
