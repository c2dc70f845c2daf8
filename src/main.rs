//! # Compliance RAG CLI (`crag`)
//!
//! Ingest compliance documents and answer audit questions with cited
//! evidence.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `crag init` | Create the SQLite database and run schema migrations |
//! | `crag upload <paths…>` | Ingest PDF, DOCX, PNG and JPEG files or directories |
//! | `crag query "<question>"` | Answer a question from the uploaded evidence |
//! | `crag status <id>` | Show a document's processing status |
//! | `crag stats` | Document and chunk counts |
//! | `crag serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! crag init --config ./config/crag.toml
//! crag upload ./evidence/ --config ./config/crag.toml
//! crag query "When is the audit deadline?" --analysis
//! ```
//!
//! Logs go to stderr; `RUST_LOG` controls the level (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use compliance_rag::{config, migrate, query, server, status, upload};

#[derive(Parser)]
#[command(
    name = "crag",
    about = "Compliance RAG — answer audit questions from uploaded compliance documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/crag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Ingest documents.
    ///
    /// Directories are walked recursively; re-uploading a path replaces the
    /// earlier version of that document.
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Ask a question against the uploaded evidence.
    Query {
        question: String,

        /// Number of excerpts to retrieve (default depends on question complexity).
        #[arg(long)]
        top_k: Option<usize>,

        /// Also print the query analysis.
        #[arg(long)]
        analysis: bool,

        /// Print the response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show a document's processing status.
    Status { id: String },

    /// Show document and chunk counts.
    Stats,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Upload { paths } => {
            upload::run_upload(cfg, &paths).await?;
        }
        Commands::Query {
            question,
            top_k,
            analysis,
            json,
        } => {
            query::run_query(cfg, &question, top_k, analysis, json).await?;
        }
        Commands::Status { id } => {
            status::run_status(cfg, &id).await?;
        }
        Commands::Stats => {
            status::run_stats(cfg).await?;
        }
        Commands::Serve => {
            let app = compliance_rag::app::App::open(cfg).await?;
            server::run_server(app).await?;
        }
    }

    Ok(())
}
