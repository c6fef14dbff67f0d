//! # Ragify CLI (`ragify`)
//!
//! Command-line surface for the retrieval-augmented assistant. It manages
//! the two kinds of knowledge sources (uploaded files and registered web
//! links), keeps the vector index synchronized with them, and runs the
//! chat loop.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragify init` | Create the link registry and the vector collection |
//! | `ragify files add <path>...` | Upload files and index their content |
//! | `ragify files rm <name>...` | Delete stored files and their vectors |
//! | `ragify files list` | List stored files |
//! | `ragify links add <url>...` | Register links and index their content |
//! | `ragify links rm <url>...` | Unregister links and remove their vectors |
//! | `ragify links list` | List registered links |
//! | `ragify search "<query>"` | Show the top-k chunks for a query |
//! | `ragify chat [message]` | One-shot answer, or an interactive session |
//!
//! ## Examples
//!
//! ```bash
//! ragify init --config ./config/ragify.toml
//! ragify files add ./docs/refund-policy.pdf
//! ragify links add https://example.com/faq
//! ragify search "refund policy"
//! ragify chat "What is the refund policy?"
//! ```

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

use ragify::chat::OpenAiChat;
use ragify::config::{self, Config};
use ragify::embedding::OpenAiEmbedder;
use ragify::extract::Extractor;
use ragify::index::{QdrantIndex, VectorIndex};
use ragify::models::ChatMessage;
use ragify::registry::{is_url_valid, LinkRegistry};
use ragify::responder::Responder;
use ragify::storage::{content_type_for, ObjectStorage, S3Storage};
use ragify::sync::{SyncResult, Synchronizer};

/// Ragify — chat with your documents and links.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. API keys and AWS credentials come from the environment.
#[derive(Parser)]
#[command(
    name = "ragify",
    about = "Ragify — a retrieval-augmented chat assistant over your documents and links",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragify.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the link registry and the vector collection.
    ///
    /// Idempotent: running it against existing state is safe.
    Init,

    /// Manage uploaded document files.
    Files {
        #[command(subcommand)]
        action: FilesAction,
    },

    /// Manage registered web links.
    Links {
        #[command(subcommand)]
        action: LinksAction,
    },

    /// Search the index and print the top-k chunks with scores.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results (defaults to `chat.top_k`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Chat with the indexed knowledge base.
    ///
    /// With a message argument, prints one streamed answer and exits.
    /// Without one, starts an interactive session that keeps conversation
    /// history until `exit`.
    Chat {
        /// One-shot user message.
        message: Option<String>,
    },
}

#[derive(Subcommand)]
enum FilesAction {
    /// Upload local files to storage and index their content.
    Add {
        /// Paths of the files to upload.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Delete stored files and remove their vectors.
    Rm {
        /// Stored filenames to delete.
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// List stored files.
    List,
}

#[derive(Subcommand)]
enum LinksAction {
    /// Register web links and index their content.
    Add {
        /// URLs to register.
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Unregister web links and remove their vectors.
    Rm {
        /// Registered URLs to remove.
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// List registered links.
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let registry = LinkRegistry::connect(&cfg.registry.db_path).await?;
            registry.close().await;
            let embedder = Arc::new(OpenAiEmbedder::new(cfg.embedding.clone())?);
            QdrantIndex::connect(&cfg.vector, embedder).await?;
            println!("Registry and vector collection initialized.");
        }
        Commands::Files { action } => run_files(&cfg, action).await?,
        Commands::Links { action } => run_links(&cfg, action).await?,
        Commands::Search { query, limit } => {
            let index = connect_index(&cfg).await?;
            let hits = index
                .search(&query, limit.unwrap_or(cfg.chat.top_k))
                .await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!("{}. [{:.4}] {}", i + 1, hit.score, hit.source_id);
                println!("   {}", hit.chunk_text.replace('\n', " "));
            }
        }
        Commands::Chat { message } => run_chat(&cfg, message).await?,
    }

    Ok(())
}

async fn connect_index(cfg: &Config) -> Result<Arc<dyn VectorIndex>> {
    let embedder = Arc::new(OpenAiEmbedder::new(cfg.embedding.clone())?);
    let index = QdrantIndex::connect(&cfg.vector, embedder).await?;
    Ok(Arc::new(index))
}

async fn synchronizer(cfg: &Config, storage: Arc<dyn ObjectStorage>) -> Result<Synchronizer> {
    let index = connect_index(cfg).await?;
    let extractor = Arc::new(Extractor::new(storage));
    Ok(Synchronizer::new(extractor, index, cfg.chunking.clone()))
}

async fn run_files(cfg: &Config, action: FilesAction) -> Result<()> {
    let storage: Arc<dyn ObjectStorage> = Arc::new(S3Storage::new(cfg.storage.clone())?);

    match action {
        FilesAction::Add { paths } => {
            let mut uploaded = Vec::with_capacity(paths.len());
            for path in &paths {
                let filename = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .with_context(|| format!("invalid file name: {}", path.display()))?
                    .to_string();
                let bytes = std::fs::read(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let url = storage
                    .put(&filename, bytes, content_type_for(&filename))
                    .await?;
                println!("Uploaded {} -> {}", filename, url);
                uploaded.push(filename);
            }

            let sync = synchronizer(cfg, storage.clone()).await?;
            let result = sync.sync_files(storage.as_ref(), &uploaded, &[]).await?;
            print_sync_result(&result);
        }
        FilesAction::Rm { names } => {
            for name in &names {
                storage.delete(name).await?;
                println!("Deleted {}", name);
            }

            let sync = synchronizer(cfg, storage.clone()).await?;
            let result = sync.sync_files(storage.as_ref(), &[], &names).await?;
            print_sync_result(&result);
        }
        FilesAction::List => {
            let names = storage.list_filenames().await?;
            if names.is_empty() {
                println!("No stored files.");
            }
            for name in names {
                println!("{}", name);
            }
        }
    }
    Ok(())
}

async fn run_links(cfg: &Config, action: LinksAction) -> Result<()> {
    let registry = LinkRegistry::connect(&cfg.registry.db_path).await?;
    let storage: Arc<dyn ObjectStorage> = Arc::new(S3Storage::new(cfg.storage.clone())?);

    match action {
        LinksAction::Add { urls } => {
            for url in &urls {
                if !is_url_valid(url) {
                    bail!("invalid URL: {}", url);
                }
            }

            let mut desired = registry.get_links().await?;
            for url in urls {
                if !desired.contains(&url) {
                    desired.push(url);
                }
            }

            let sync = synchronizer(cfg, storage).await?;
            let result = sync.sync_links(&registry, &desired).await?;
            print_sync_result(&result);
        }
        LinksAction::Rm { urls } => {
            let desired: Vec<String> = registry
                .get_links()
                .await?
                .into_iter()
                .filter(|link| !urls.contains(link))
                .collect();

            let sync = synchronizer(cfg, storage).await?;
            let result = sync.sync_links(&registry, &desired).await?;
            print_sync_result(&result);
        }
        LinksAction::List => {
            let links = registry.get_links().await?;
            if links.is_empty() {
                println!("No registered links.");
            }
            for link in links {
                println!("{}", link);
            }
        }
    }

    registry.close().await;
    Ok(())
}

fn print_sync_result(result: &SyncResult) {
    println!(
        "Synchronized: {} added, {} removed.",
        result.added.len(),
        result.removed.len()
    );
    for failure in &result.failed.added {
        println!("  failed to add {}: {}", failure.source_id, failure.kind);
    }
    for failure in &result.failed.removed {
        println!("  failed to remove {}: {}", failure.source_id, failure.kind);
    }
}

async fn run_chat(cfg: &Config, message: Option<String>) -> Result<()> {
    let index = connect_index(cfg).await?;
    let model = Arc::new(OpenAiChat::new(cfg.chat.clone())?);
    let responder = Responder::new(index, model, cfg.chat.top_k);

    if let Some(message) = message {
        answer(&responder, &[], &message).await?;
        return Ok(());
    }

    let mut history: Vec<ChatMessage> = Vec::new();

    println!("Interactive session. Type 'exit' to quit.");
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if prompt == "exit" || prompt == "quit" {
            break;
        }

        let reply = answer(&responder, &history, prompt).await?;
        history.push(ChatMessage::user(prompt));
        history.push(ChatMessage::assistant(reply));
    }

    Ok(())
}

/// Stream one answer to stdout, returning the full text for history.
async fn answer(responder: &Responder, history: &[ChatMessage], prompt: &str) -> Result<String> {
    let mut reply = responder.respond(prompt, history).await;

    let mut full = String::new();
    while let Some(fragment) = reply.fragments.recv().await {
        print!("{}", fragment);
        std::io::stdout().flush()?;
        full.push_str(&fragment);
    }
    println!();

    if !reply.hits.is_empty() {
        let mut sources: Vec<&str> = reply.hits.iter().map(|h| h.source_id.as_str()).collect();
        sources.dedup();
        println!("(sources: {})", sources.join(", "));
    }

    Ok(full)
}
