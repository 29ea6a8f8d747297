use anyhow::Context;
use chrono::Utc;
use citewise_core::{
    AppConfig, CollectionStore, DocumentIngestor, EmbeddingGateway, IngestionOptions, Outcome,
    SearchOrchestrator,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "citewise", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory of the local collection store.
    #[arg(long, env = "VECTOR_DB_PATH")]
    vector_db_path: Option<PathBuf>,

    /// Sentence embedding model name.
    #[arg(long, env = "EMBEDDING_MODEL")]
    embedding_model: Option<String>,

    /// Device the embedding model runs on.
    #[arg(long, env = "EMBEDDING_DEVICE")]
    embedding_device: Option<String>,

    /// HTTP embedding service; the offline trigram embedder is used without it.
    #[arg(long, env = "EMBEDDING_ENDPOINT")]
    embedding_endpoint: Option<String>,

    /// Chroma server base URL; the local store is used without it.
    #[arg(long, env = "CHROMA_URL")]
    chroma_url: Option<String>,

    /// Per-collection query timeout in milliseconds.
    #[arg(long, env = "COLLECTION_TIMEOUT_MS")]
    collection_timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest PDFs, one collection per document.
    Ingest {
        /// PDF files to ingest.
        files: Vec<PathBuf>,
        /// Folder that contains PDFs recursively.
        #[arg(long)]
        folder: Option<PathBuf>,
        /// Maximum characters per chunk.
        #[arg(long, default_value_t = 1000)]
        chunk_size: usize,
        /// Characters shared between neighbouring chunks.
        #[arg(long, default_value_t = 200)]
        chunk_overlap: usize,
    },
    /// Find the best matching passages across the selected sources.
    Search {
        /// Search query
        #[arg(long)]
        query: String,
        /// Number of matches to return.
        #[arg(long, default_value = "5")]
        k: String,
        /// Source to search; repeat for more. Defaults to every source.
        #[arg(long = "source")]
        sources: Vec<String>,
    },
    /// List the ingested sources.
    Sources,
}

impl Cli {
    fn config(&self) -> AppConfig {
        let mut config = AppConfig::from_env();
        if let Some(path) = &self.vector_db_path {
            config.vector_db_path = path.clone();
        }
        if let Some(model) = &self.embedding_model {
            config.embedding_model = model.clone();
        }
        if let Some(device) = &self.embedding_device {
            config.embedding_device = device.clone();
        }
        if self.embedding_endpoint.is_some() {
            config.embedding_endpoint = self.embedding_endpoint.clone();
        }
        if self.chroma_url.is_some() {
            config.chroma_url = self.chroma_url.clone();
        }
        if let Some(millis) = self.collection_timeout_ms.filter(|millis| *millis > 0) {
            config.collection_timeout = Some(Duration::from_millis(millis));
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.config();

    let store = Arc::new(config.store().context("invalid store configuration")?);
    let gateway = EmbeddingGateway::new(config.embedder());
    info!(
        version = app_version,
        store = %store.describe(),
        model = %config.embedding_model,
        started_at = %Utc::now().to_rfc3339(),
        "citewise boot"
    );

    match cli.command {
        Command::Ingest {
            files,
            folder,
            chunk_size,
            chunk_overlap,
        } => {
            let options = IngestionOptions {
                chunk_size,
                chunk_overlap,
                ..IngestionOptions::default()
            };
            let ingestor = DocumentIngestor::new(options, gateway, Arc::clone(&store))?;

            let report = match folder {
                Some(folder) => ingestor.ingest_folder(&folder).await?,
                None if files.is_empty() => {
                    anyhow::bail!("pass PDF files or --folder to ingest");
                }
                None => ingestor.ingest_files(&files).await,
            };

            for skipped in &report.skipped_files {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
            }
            for document in &report.documents {
                println!(
                    "{}: {} chunks from {}",
                    document.source_id,
                    document.chunk_count,
                    document.path.display()
                );
            }

            println!(
                "{} chunks ingested from {} file(s) at {}",
                report.total_chunks(),
                report.documents.len(),
                Utc::now().to_rfc3339()
            );
            if !report.skipped_files.is_empty() {
                println!("{} file(s) skipped", report.skipped_files.len());
            }
        }
        Command::Search { query, k, sources } => {
            let orchestrator =
                SearchOrchestrator::with_options(gateway, store, config.retrieval_options());

            let selected = if sources.is_empty() {
                orchestrator
                    .available_sources()
                    .await
                    .context("unable to list sources")?
                    .into_iter()
                    .collect()
            } else {
                sources
            };

            match orchestrator.search(&query, &k, &selected).await {
                Outcome::Results(results) => {
                    for result in results {
                        println!("{} | Distance: {:.4}", result.source(), result.distance);
                        match result.page_span() {
                            Some(span) => println!("Page(s): {span}"),
                            None => println!("Page(s): unknown"),
                        }
                        println!("{}\n", result.document);
                    }
                }
                Outcome::Warning(message) => println!("warning: {message}"),
                Outcome::Info(message) => println!("{message}"),
                Outcome::Error(message) => anyhow::bail!(message),
            }
        }
        Command::Sources => {
            let sources = store
                .list_collections()
                .await
                .context("unable to list sources")?;
            if sources.is_empty() {
                println!("no sources ingested yet");
            }
            for source in sources {
                println!("{source}");
            }
        }
    }

    Ok(())
}
