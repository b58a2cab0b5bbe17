mod samples;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use quarry_core::config::{Config, ProviderKind};
use quarry_core::{AnswerResult, IngestReport, RagError, RagPipeline, open_store};
use quarry_llm::any::AnyProvider;
use quarry_llm::ollama::OllamaProvider;
use quarry_llm::openai::OpenAiProvider;
use quarry_memory::document::{Document, DocumentLoader, TextLoader, WebLoader};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "quarry", version, about = "Ask questions about your documents")]
struct Cli {
    /// Configuration file (defaults to $QUARRY_CONFIG, then config/default.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Add documents to the index
    Ingest {
        /// Text or markdown files
        files: Vec<PathBuf>,
        /// Web pages to fetch
        #[arg(long = "url")]
        urls: Vec<String>,
        /// Inline text
        #[arg(long)]
        text: Option<String>,
        /// Document id for --text
        #[arg(long, requires = "text")]
        source: Option<String>,
        /// JSON array of documents ({"id", "text", "metadata"})
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Answer a single question
    Query {
        question: String,
        /// Number of chunks to retrieve
        #[arg(short)]
        k: Option<usize>,
    },
    /// Interactive question loop
    Chat,
    /// Show collection statistics
    Info,
    /// Delete every indexed document
    Reset,
    /// Load the sample documents and answer the demo questions
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let provider = create_provider(&config)?;
    health_check(&provider).await;

    let store = open_store(&config.index)
        .await
        .context("failed to open vector index")?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal");
        shutdown.cancel();
    });

    let pipeline =
        RagPipeline::from_config(&config, Arc::new(provider), store)?.with_cancellation(cancel);

    match cli.command {
        Command::Ingest {
            files,
            urls,
            text,
            source,
            json,
        } => {
            let mut documents = collect_documents(&files, &urls).await;
            if let Some(text) = text {
                documents.push(inline_document(text, source));
            }
            if let Some(path) = json {
                documents.extend(read_json_documents(&path)?);
            }
            if documents.is_empty() {
                bail!("nothing to ingest: pass files, --url, --text or --json");
            }
            let report = pipeline.add_documents(documents).await;
            print_report(&report);
        }
        Command::Query { question, k } => {
            let k = k.unwrap_or(pipeline.default_k());
            let result = pipeline.query_k(&question, k).await?;
            print_answer(&result);
        }
        Command::Chat => run_chat(&pipeline).await?,
        Command::Info => print_info(&pipeline).await?,
        Command::Reset => {
            pipeline.reset().await?;
            println!("Collection {} deleted.", config.index.collection);
        }
        Command::Demo => run_demo(&pipeline).await?,
    }

    Ok(())
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config_path(cli_path: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_path {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("QUARRY_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

fn create_provider(config: &Config) -> anyhow::Result<AnyProvider> {
    match config.llm.provider {
        ProviderKind::Ollama => Ok(AnyProvider::Ollama(OllamaProvider::new(
            config.llm.base_url(),
            config.llm.chat_model.clone(),
            config.llm.embedding_model.clone(),
        ))),
        ProviderKind::OpenAi => {
            let api_key = config
                .secrets
                .openai_api_key
                .as_ref()
                .context("OpenAI API key not found: set QUARRY_OPENAI_API_KEY or OPENAI_API_KEY")?;
            let provider = OpenAiProvider::new(
                api_key.expose().to_owned(),
                config.llm.base_url().to_owned(),
                config.llm.chat_model.clone(),
                config.llm.max_tokens,
                Some(config.llm.embedding_model.clone()),
            )
            .with_temperature(config.llm.temperature);
            Ok(AnyProvider::OpenAi(provider))
        }
    }
}

async fn health_check(provider: &AnyProvider) {
    if let AnyProvider::Ollama(ollama) = provider {
        match ollama.health_check().await {
            Ok(()) => tracing::info!("ollama health check passed"),
            Err(e) => tracing::warn!("ollama health check failed: {e:#}"),
        }
    }
}

/// Load files and web pages, logging and skipping sources that fail.
async fn collect_documents(files: &[PathBuf], urls: &[String]) -> Vec<Document> {
    let mut documents = Vec::new();

    let text_loader = TextLoader::default();
    for file in files {
        let source = file.to_string_lossy();
        match text_loader.load(&source).await {
            Ok(docs) => documents.extend(docs),
            Err(e) => tracing::warn!(source = %source, "failed to load file: {e:#}"),
        }
    }

    let web_loader = WebLoader::default();
    for url in urls {
        match web_loader.load(url).await {
            Ok(docs) => documents.extend(docs),
            Err(e) => tracing::warn!(url = %url, "failed to fetch page: {e:#}"),
        }
    }

    documents
}

fn inline_document(text: String, source: Option<String>) -> Document {
    let doc = Document::new(text);
    match source {
        Some(source) => doc
            .with_metadata("source", source.as_str())
            .with_id(source),
        None => doc.with_metadata("source", "inline"),
    }
}

fn read_json_documents(path: &Path) -> anyhow::Result<Vec<Document>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array of documents", path.display()))
}

fn print_report(report: &IngestReport) {
    println!(
        "Ingested {} document(s), {} chunk(s) written.",
        report.documents_ingested, report.chunks_written
    );
    for (id, error) in &report.errors {
        eprintln!("  failed {id}: {error}");
    }
}

fn print_answer(result: &AnswerResult) {
    println!("{}\n", result.answer);
    if !result.has_context {
        println!("(no relevant documents found)");
        return;
    }
    let context = &result.context_used;
    println!("Sources:");
    for entry in &context.entries {
        println!(
            "  [{}] {} (chunk {}, score {:.3})",
            entry.rank + 1,
            entry.chunk.source_id,
            entry.chunk.chunk_index,
            entry.score
        );
    }
    if context.truncated {
        println!(
            "(top chunk cut to {} characters to fit the context budget)",
            context.total_chars
        );
    }
    if context.duplicates_dropped > 0 {
        println!("({} duplicate chunks skipped)", context.duplicates_dropped);
    }
}

async fn print_info(pipeline: &RagPipeline<AnyProvider>) -> anyhow::Result<()> {
    let info = pipeline.get_collection_info().await?;
    println!("Collection:     {}", info.collection);
    println!("Chunks:         {}", info.count);
    match info.dimensionality {
        Some(d) => println!("Dimensionality: {d}"),
        None => println!("Dimensionality: -"),
    }
    Ok(())
}

async fn read_line(prompt: &'static str) -> anyhow::Result<String> {
    let line = tokio::task::spawn_blocking(move || {
        dialoguer::Input::<String>::new()
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
    })
    .await?
    .context("failed to read input")?;
    Ok(line.trim().to_owned())
}

async fn run_chat(pipeline: &RagPipeline<AnyProvider>) -> anyhow::Result<()> {
    println!("quarry v{}", env!("CARGO_PKG_VERSION"));
    println!("Ask questions about the indexed documents ('info' for stats, 'quit' to exit)");

    loop {
        let question = read_line("Question").await?;
        match question.to_lowercase().as_str() {
            "" => continue,
            "quit" | "exit" | "q" => break,
            "info" => {
                print_info(pipeline).await?;
                continue;
            }
            _ => {}
        }

        match pipeline.query(&question).await {
            Ok(result) => print_answer(&result),
            Err(RagError::Cancelled) => break,
            Err(e) => eprintln!("error: {e}"),
        }
        println!();
    }
    Ok(())
}

async fn run_demo(pipeline: &RagPipeline<AnyProvider>) -> anyhow::Result<()> {
    let info = pipeline.get_collection_info().await?;
    if info.count == 0 {
        println!("Loading sample documents...");
        let report = pipeline.add_documents(samples::sample_documents()).await;
        print_report(&report);
    } else {
        println!("Collection already holds {} chunk(s).", info.count);
    }

    for question in samples::DEMO_QUESTIONS {
        println!("\nQ: {question}");
        match pipeline.query_k(question, 2).await {
            Ok(result) => print_answer(&result),
            Err(RagError::Cancelled) => break,
            Err(e) => eprintln!("error: {e}"),
        }
    }
    Ok(())
}
