//! # RAG Arena CLI (`arena`)
//!
//! Ingest documents into an incrementally synced index, then chat against
//! one retrieval backend or compare two side by side.
//!
//! ## Usage
//!
//! ```bash
//! arena --config ./config/arena.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `arena init` | Create the SQLite database and run schema migrations |
//! | `arena ingest [paths…]` | Sync documents into the index (only new fragments are added) |
//! | `arena rebuild` | Clear the index and ingest everything again |
//! | `arena delete-doc <source>` | Remove every fragment of one document |
//! | `arena sources` | List indexed documents |
//! | `arena search "<query>"` | Show the fragments NaiveRAG would retrieve |
//! | `arena ask "<message>"` | One turn against one backend |
//! | `arena arena "<message>"` | One turn against both backends |
//! | `arena sessions list\|show\|delete` | Browse the conversation log |
//! | `arena serve` | Start the HTTP server |
//!
//! Set `RUST_LOG=rag_arena=debug` for pipeline logs on stderr.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rag_arena::models::BackendTag;
use rag_arena::{app, ask, config, ingest, migrate, search, server, sessions};

/// RAG Arena: incremental document indexing and side-by-side comparison
/// of retrieval-augmented chat backends.
#[derive(Parser)]
#[command(name = "arena", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/arena.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Split, identify, and sync documents into the index.
    ///
    /// Only fragments whose ID is not already indexed are embedded and
    /// written, so running this twice on the same files adds nothing the
    /// second time.
    Ingest {
        /// Files to ingest. Defaults to scanning `[documents].root`.
        paths: Vec<PathBuf>,
    },

    /// Clear the index and ingest every document from scratch.
    Rebuild,

    /// Delete every fragment of one document.
    ///
    /// Use this before re-ingesting a document whose text changed.
    DeleteDoc {
        /// Source locator as shown by `arena sources`.
        source: String,
    },

    /// List indexed documents with their fragment counts.
    Sources,

    /// Similarity search over the index.
    Search {
        query: String,

        /// Number of fragments (defaults to `[retrieval].top_k`).
        #[arg(long)]
        limit: Option<usize>,

        /// Also print the assembled prompt.
        #[arg(long)]
        prompt: bool,
    },

    /// Ask one backend a question.
    Ask {
        /// The user message. Not needed with `--retry`.
        #[arg(required_unless_present = "retry")]
        message: Option<String>,

        /// Backend: `NaiveRAG` (alias `a`) or `LightRAG` (alias `b`).
        #[arg(long, default_value = "NaiveRAG")]
        backend: BackendTag,

        /// Continue an existing session.
        #[arg(long)]
        session: Option<String>,

        /// Regenerate the reply to the session's pending user turn.
        #[arg(long, requires = "session")]
        retry: bool,
    },

    /// Ask every configured backend the same question.
    Arena {
        message: String,

        #[arg(long)]
        session: Option<String>,
    },

    /// Browse or delete logged sessions.
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum SessionAction {
    /// List sessions, most recently active first.
    List,
    /// Print every track of a session.
    Show { session_id: String },
    /// Delete a session across all tracks.
    Delete { session_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { paths } => {
            ingest::run_ingest(cfg, paths).await?;
        }
        Commands::Rebuild => {
            ingest::run_rebuild(cfg).await?;
        }
        Commands::DeleteDoc { source } => {
            ingest::run_delete_doc(cfg, &source).await?;
        }
        Commands::Sources => {
            ingest::run_sources(cfg).await?;
        }
        Commands::Search {
            query,
            limit,
            prompt,
        } => {
            search::run_search(cfg, &query, limit, prompt).await?;
        }
        Commands::Ask {
            message,
            backend,
            session,
            retry,
        } => {
            ask::run_ask(cfg, message.as_deref().unwrap_or(""), backend, session, retry).await?;
        }
        Commands::Arena { message, session } => {
            ask::run_arena(cfg, &message, session).await?;
        }
        Commands::Sessions { action } => match action {
            SessionAction::List => sessions::run_list(cfg).await?,
            SessionAction::Show { session_id } => sessions::run_show(cfg, &session_id).await?,
            SessionAction::Delete { session_id } => {
                sessions::run_delete(cfg, &session_id).await?
            }
        },
        Commands::Serve => {
            let app = app::App::open(cfg).await?;
            server::run_server(app).await?;
        }
    }

    Ok(())
}
