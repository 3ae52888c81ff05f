use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use pdf_qa_core::{
    Answer, CharacterNgramEmbedder, DuplicateGuard, Embedder, GuardStrategy, IngestionOptions,
    IngestionPipeline, LocalIndexStore, OpenAiChatModel, OpenAiEmbedder, QaService, QaSession,
    QdrantStore, Retriever, RetryPolicy, VectorStore, Writer, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_TOP_K,
};
use std::collections::BTreeSet;
use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    Local,
    Qdrant,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmbedderKind {
    /// Offline hashed character trigrams.
    Ngram,
    /// OpenAI-compatible `/embeddings` service.
    Openai,
}

#[derive(Parser)]
#[command(name = "pdf-qa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Vector store backend.
    #[arg(long, value_enum, default_value = "local", global = true)]
    backend: Backend,

    /// Root directory of the local index.
    #[arg(long, env = "PDF_QA_INDEX_DIR", default_value = ".pdf-qa-index", global = true)]
    index_dir: PathBuf,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333", global = true)]
    qdrant_url: String,

    /// Qdrant API key
    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true, global = true)]
    qdrant_api_key: Option<String>,

    /// Collection holding the chunk vectors.
    #[arg(long, env = "PDF_QA_COLLECTION", default_value = "pdf_embeddings", global = true)]
    collection: String,

    #[arg(long, value_enum, default_value = "ngram", global = true)]
    embedder: EmbedderKind,

    #[arg(long, env = "EMBEDDING_URL", default_value = "https://api.openai.com/v1", global = true)]
    embedding_url: String,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = "text-embedding-3-small", global = true)]
    embedding_model: String,

    /// Vector size; the ngram embedder uses it as its bucket count.
    #[arg(long, env = "EMBEDDING_DIMENSIONS", global = true)]
    embedding_dimensions: Option<usize>,

    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true, global = true)]
    embedding_api_key: Option<String>,

    /// OpenAI-compatible chat endpoint base URL.
    #[arg(long, env = "LLM_URL", default_value = "https://api.openai.com/v1", global = true)]
    llm_url: String,

    #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o-mini", global = true)]
    llm_model: String,

    #[arg(long, env = "LLM_API_KEY", hide_env_values = true, global = true)]
    llm_api_key: Option<String>,

    #[arg(long, default_value = "0.3", global = true)]
    temperature: f32,

    /// Attempts per outbound request, including the first.
    #[arg(long, default_value = "3", global = true)]
    max_attempts: usize,

    /// Per-request timeout in seconds.
    #[arg(long, default_value = "30", global = true)]
    request_timeout: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one PDF or every PDF under a directory.
    Ingest {
        /// PDF file or folder that contains PDFs recursively.
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value = "1000")]
        chunk_size: usize,
        #[arg(long, default_value = "200")]
        chunk_overlap: usize,
        /// Height of the header and footer bands dropped from every page.
        #[arg(long, default_value = "50")]
        margin: f32,
        #[arg(long, default_value = "64")]
        embed_batch_size: usize,
        /// Only treat a document as indexed when it has chunks on pages 2 to 7.
        #[arg(long, default_value_t = false)]
        guard_page_window: bool,
    },
    /// Answer one question from the indexed documents.
    Ask {
        #[arg(long)]
        question: String,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
    },
    /// Read questions from stdin until EOF or `exit`.
    Chat {
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
    },
    /// Print the nearest chunks without generating an answer.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
    /// Report whether a document id (file name) is already in the collection.
    Indexed {
        #[arg(long)]
        document: String,
        #[arg(long, default_value_t = false)]
        guard_page_window: bool,
    },
    /// Delete the whole collection.
    DropCollection {
        /// Required confirmation.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

impl Cli {
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            timeout: Duration::from_secs(self.request_timeout.max(1)),
            ..RetryPolicy::default()
        }
    }

    fn open_store(&self) -> anyhow::Result<Box<dyn VectorStore>> {
        Ok(match self.backend {
            Backend::Local => Box::new(LocalIndexStore::new(&self.index_dir)),
            Backend::Qdrant => Box::new(
                QdrantStore::new(
                    &self.qdrant_url,
                    self.qdrant_api_key.clone(),
                    self.retry_policy(),
                )
                .context("invalid qdrant configuration")?,
            ),
        })
    }

    fn open_embedder(&self) -> anyhow::Result<Box<dyn Embedder>> {
        Ok(match self.embedder {
            EmbedderKind::Ngram => Box::new(CharacterNgramEmbedder::new(
                self.embedding_dimensions
                    .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),
            )),
            EmbedderKind::Openai => Box::new(
                OpenAiEmbedder::new(
                    &self.embedding_url,
                    self.embedding_api_key.clone(),
                    &self.embedding_model,
                    self.embedding_dimensions.unwrap_or(1536),
                    self.retry_policy(),
                )
                .context("invalid embedding configuration")?,
            ),
        })
    }

    fn open_chat_model(&self) -> anyhow::Result<OpenAiChatModel> {
        Ok(OpenAiChatModel::new(
            &self.llm_url,
            self.llm_api_key.clone(),
            &self.llm_model,
            self.retry_policy(),
        )
        .context("invalid language model configuration")?
        .with_temperature(self.temperature))
    }
}

fn guard_strategy(page_window: bool) -> GuardStrategy {
    if page_window {
        GuardStrategy::MIDDLE_PAGES
    } else {
        GuardStrategy::Exact
    }
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text.trim());

    let sources = answer
        .sources
        .iter()
        .map(|source| (source.document_id.as_str(), source.page))
        .collect::<BTreeSet<_>>();
    if !sources.is_empty() {
        println!();
        println!("sources:");
        for (document_id, page) in sources {
            println!("  {document_id} p.{page}");
        }
    }
    println!("({:.2}s)", answer.elapsed.as_secs_f64());
}

fn preview(text: &str, limit: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= limit {
        flat
    } else {
        format!("{}...", flat.chars().take(limit).collect::<String>())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let store = cli.open_store()?;
    let embedder = cli.open_embedder()?;

    info!(
        version = app_version,
        backend = store.backend(),
        collection = %cli.collection,
        embedding_model = embedder.model_id(),
        started_at = %Utc::now().to_rfc3339(),
        "pdf-qa boot"
    );

    match &cli.command {
        Command::Ingest {
            path,
            chunk_size,
            chunk_overlap,
            margin,
            embed_batch_size,
            guard_page_window,
        } => {
            let options = IngestionOptions {
                chunk_size: *chunk_size,
                chunk_overlap: *chunk_overlap,
                header_footer_margin: *margin,
                embed_batch_size: *embed_batch_size,
                ..IngestionOptions::default()
            };
            let pipeline = IngestionPipeline::new(&*store, &*embedder, &cli.collection, &options)?
                .with_guard(guard_strategy(*guard_page_window));

            let report = pipeline.ingest_path(path).await?;

            for skipped in &report.skipped_files {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
            }
            for document in &report.indexed {
                println!(
                    "indexed {} ({} pages, {} chunks)",
                    document.fingerprint.document_id,
                    document.fingerprint.page_count,
                    document.chunk_count
                );
            }
            for path in &report.already_indexed {
                println!("already indexed {}", path.display());
            }
            println!(
                "{} indexed, {} already present, {} skipped, {} chunks written",
                report.indexed.len(),
                report.already_indexed.len(),
                report.skipped_files.len(),
                report.chunk_count()
            );
        }
        Command::Ask { question, top_k } => {
            let model = cli.open_chat_model()?;
            let service = QaService::new(&*store, &*embedder, &model, &cli.collection);
            let answer = service.ask(question, *top_k).await?;
            print_answer(&answer);
        }
        Command::Chat { top_k } => {
            let model = cli.open_chat_model()?;
            let service = QaService::new(&*store, &*embedder, &model, &cli.collection);
            let mut session = QaSession::new();
            let mut lines = BufReader::new(tokio::io::stdin()).lines();

            loop {
                print!("> ");
                std::io::stdout().flush()?;

                let Some(line) = lines.next_line().await? else {
                    break;
                };
                let question = line.trim();
                match question {
                    "" => continue,
                    "exit" | "quit" => break,
                    "/clear" => {
                        session.clear();
                        continue;
                    }
                    "/history" => {
                        for (index, exchange) in session.history().iter().enumerate() {
                            println!("{}. {}", index + 1, exchange.question);
                        }
                        continue;
                    }
                    _ => {}
                }

                match session.ask(&service, question, *top_k).await {
                    Ok(answer) => print_answer(&answer),
                    Err(error) => eprintln!("error: {error}"),
                }
            }
        }
        Command::Search { query, top_k } => {
            let result = Retriever::new(&*store, &*embedder, &cli.collection)
                .search(query, *top_k)
                .await?;
            if result.is_empty() {
                println!("no matches");
            }
            for ((text, metadata), score) in result
                .texts
                .iter()
                .zip(&result.metadata)
                .zip(&result.scores)
            {
                println!(
                    "{score:.4}  {} p.{}  {}",
                    metadata.document_id,
                    metadata.page,
                    preview(text, 120)
                );
            }
        }
        Command::Indexed {
            document,
            guard_page_window,
        } => {
            let indexed = DuplicateGuard::new(&*store, guard_strategy(*guard_page_window))
                .is_indexed(&cli.collection, document)
                .await;
            println!("{document}: {}", if indexed { "indexed" } else { "not indexed" });
        }
        Command::DropCollection { yes } => {
            if !yes {
                bail!(
                    "refusing to drop collection {} without --yes",
                    cli.collection
                );
            }
            Writer::new(&*store, &*embedder, &cli.collection)
                .drop_collection()
                .await?;
            println!("dropped {}", cli.collection);
        }
    }

    Ok(())
}
