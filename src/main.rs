//! # mailbrief CLI (`mbx`)
//!
//! The `mbx` binary drives the pipeline: database initialization, folder
//! discovery, ingestion (with interactive pause/cancel), run management,
//! and question answering.
//!
//! ## Usage
//!
//! ```bash
//! mbx --config ./config/mailbrief.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mbx init` | Create the SQLite database and run schema migrations |
//! | `mbx folders` | List mail folders with approximate item counts |
//! | `mbx ingest` | Ingest selected folders or messages into the index |
//! | `mbx runs` | List ingestion runs, newest first |
//! | `mbx clear` | Forget one run or the whole index |
//! | `mbx status` | Show what is stored and indexed |
//! | `mbx ask "<question>"` | Answer a question with cited sources |
//! | `mbx serve` | Start the JSON HTTP server |
//!
//! During `mbx ingest`, the first Ctrl-C pauses the run and asks whether
//! to continue; a second Ctrl-C cancels it. Batches committed before a
//! cancel stay indexed.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use mailbrief::answer::AnswerEngine;
use mailbrief::config::{self, Config};
use mailbrief::control::IngestControl;
use mailbrief::crypto::{salt_path_for, BodyCipher};
use mailbrief::db;
use mailbrief::embedding::create_embedder;
use mailbrief::error::Error;
use mailbrief::graph::{GraphMailSource, MailSource};
use mailbrief::index::VectorIndex;
use mailbrief::ingest::{IngestSelection, Ingestor, RunStatus};
use mailbrief::migrate;
use mailbrief::models::Answer;
use mailbrief::progress::ProgressMode;
use mailbrief::server;
use mailbrief::store::MessageStore;
use mailbrief::synth::OllamaSynthesizer;

/// mailbrief — ask questions of your own mailbox, locally.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/mailbrief.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "mbx",
    about = "mailbrief — local-first question answering over your Outlook mailbox",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mailbrief.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Running
    /// it multiple times is safe.
    Init,

    /// List mail folders with their approximate item counts.
    ///
    /// Use the printed folder ids with `mbx ingest --folder`.
    Folders,

    /// Ingest selected folders or messages into the local index.
    ///
    /// Pass `--folder <id>` (repeatable) for a folder-scoped run capped at
    /// the most recent N messages per folder, or `--message <id>`
    /// (repeatable) for an explicit selection. Ctrl-C pauses; Ctrl-C again
    /// cancels, keeping batches committed so far.
    Ingest {
        /// Folder id to ingest (repeatable).
        #[arg(long = "folder")]
        folders: Vec<String>,

        /// Message id to ingest (repeatable, mutually exclusive with --folder).
        #[arg(long = "message")]
        messages: Vec<String>,

        /// Most-recent-N cap per folder (default from config).
        #[arg(long)]
        limit_per_folder: Option<usize>,

        /// Messages per store/index commit (default from config).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Messages per remote page fetch (default from config).
        #[arg(long)]
        page_size: Option<usize>,

        /// Progress output: off, human, or json (default: human on a TTY).
        #[arg(long)]
        progress: Option<String>,
    },

    /// List ingestion runs, newest first, with live message counts.
    Runs {
        /// Maximum number of runs to show.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Forget indexed mail: one run's messages, or everything.
    Clear {
        /// Run id to clear (from `mbx runs`).
        #[arg(long)]
        run: Option<String>,

        /// Clear every run and message.
        #[arg(long)]
        all: bool,
    },

    /// Show what is stored and indexed.
    Status,

    /// Answer a question from the indexed mail, with cited sources.
    Ask {
        /// The question.
        question: String,

        /// Maximum number of cited sources.
        #[arg(long)]
        sources: Option<usize>,
    },

    /// Start the JSON HTTP server (health, query, status, runs).
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            init_tracing("warn");
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Folders => {
            init_tracing("warn");
            run_folders(&cfg).await?;
        }
        Commands::Ingest {
            folders,
            messages,
            limit_per_folder,
            batch_size,
            page_size,
            progress,
        } => {
            init_tracing("warn");
            run_ingest(
                &cfg,
                folders,
                messages,
                limit_per_folder,
                batch_size,
                page_size,
                progress,
            )
            .await?;
        }
        Commands::Runs { limit } => {
            init_tracing("warn");
            run_runs(&cfg, limit).await?;
        }
        Commands::Clear { run, all } => {
            init_tracing("warn");
            run_clear(&cfg, run, all).await?;
        }
        Commands::Status => {
            init_tracing("warn");
            run_status(&cfg).await?;
        }
        Commands::Ask { question, sources } => {
            init_tracing("warn");
            run_ask(&cfg, &question, sources).await?;
        }
        Commands::Serve => {
            init_tracing("info");
            run_serve(&cfg).await?;
        }
    }

    Ok(())
}

fn init_tracing(default_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn cipher_from_config(cfg: &Config) -> Result<Option<BodyCipher>> {
    if !cfg.crypto.enabled {
        return Ok(None);
    }
    let passphrase = std::env::var(&cfg.crypto.passphrase_env).map_err(|_| {
        anyhow::anyhow!(
            "encryption is enabled; set the {} environment variable",
            cfg.crypto.passphrase_env
        )
    })?;
    let cipher = BodyCipher::derive(&passphrase, &salt_path_for(&cfg.db.path))?;
    Ok(Some(cipher))
}

async fn open_store(cfg: &Config) -> Result<(sqlx::SqlitePool, Arc<MessageStore>)> {
    let pool = db::connect(&cfg.db.path).await?;
    migrate::run_migrations(&pool).await?;
    let store = MessageStore::open(pool.clone(), cipher_from_config(cfg)?).await?;
    Ok((pool, Arc::new(store)))
}

async fn run_folders(cfg: &Config) -> Result<()> {
    let mail = GraphMailSource::new(&cfg.graph)?;
    let folders = mail.list_folders().await?;

    if folders.is_empty() {
        println!("No folders found.");
        return Ok(());
    }

    println!("{:<48} {:>8}   {}", "FOLDER ID", "ITEMS", "NAME");
    println!("{}", "-".repeat(76));
    for f in &folders {
        println!(
            "{:<48} {:>8}   {}",
            f.id, f.total_item_count, f.display_name
        );
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_ingest(
    cfg: &Config,
    folders: Vec<String>,
    messages: Vec<String>,
    limit_per_folder: Option<usize>,
    batch_size: Option<usize>,
    page_size: Option<usize>,
    progress: Option<String>,
) -> Result<()> {
    let selection = match (folders.is_empty(), messages.is_empty()) {
        (false, true) => IngestSelection::Folders {
            folder_ids: folders,
            per_folder_limit: limit_per_folder.unwrap_or(cfg.ingest.per_folder_limit),
        },
        (true, false) => IngestSelection::Messages {
            message_ids: messages,
        },
        (true, true) => anyhow::bail!("nothing selected: pass --folder or --message"),
        (false, false) => anyhow::bail!("--folder and --message are mutually exclusive"),
    };

    let mode = match progress.as_deref() {
        None => ProgressMode::default_for_tty(),
        Some("off") => ProgressMode::Off,
        Some("human") => ProgressMode::Human,
        Some("json") => ProgressMode::Json,
        Some(other) => anyhow::bail!("unknown progress mode: {}. Use off, human, or json.", other),
    };
    let reporter = mode.reporter();

    let (pool, store) = open_store(cfg).await?;
    let embedder = create_embedder(&cfg.embedding)?;
    let index = Arc::new(VectorIndex::new(pool.clone(), embedder));
    let mail: Arc<dyn MailSource> = Arc::new(GraphMailSource::new(&cfg.graph)?);

    let mut tuning = cfg.ingest.clone();
    if let Some(b) = batch_size {
        tuning.batch_size = b;
    }
    if let Some(p) = page_size {
        tuning.page_size = p;
    }

    let ingestor = Ingestor::new(store, index, mail, tuning);
    let control = IngestControl::new();
    spawn_signal_handler(control.clone());

    match ingestor.run(selection, &control, reporter.as_ref()).await {
        Ok(outcome) => {
            match outcome.status {
                RunStatus::Completed => {
                    println!("ingest complete");
                }
                RunStatus::Cancelled => {
                    println!("ingest cancelled — items from committed batches remain indexed");
                }
            }
            println!("  run: {}  ({})", outcome.run_id, outcome.label);
            println!("  stored: {} messages", outcome.stored);
            if outcome.rejected > 0 {
                println!("  skipped: {} records without identifiers", outcome.rejected);
            }
        }
        Err(failure) => {
            eprintln!("Error: {}", failure.error);
            if let Some(detail) = failure.error.detail() {
                eprintln!("  detail: {}", detail);
            }
            if failure.committed > 0 {
                eprintln!(
                    "  {} messages were stored and indexed before the error",
                    failure.committed
                );
            }
            pool.close().await;
            std::process::exit(1);
        }
    }

    pool.close().await;
    Ok(())
}

/// First Ctrl-C pauses the run and offers a choice; the second cancels.
fn spawn_signal_handler(control: IngestControl) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        control.request_pause();
        eprintln!("\nPaused. Press Enter to continue, or Ctrl-C again to cancel.");

        let resume_control = control.clone();
        tokio::task::spawn_blocking(move || {
            let mut line = String::new();
            if std::io::stdin().read_line(&mut line).is_ok() {
                resume_control.resume();
            }
        });

        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling — items already committed stay indexed.");
            control.cancel();
        }
    });
}

async fn run_runs(cfg: &Config, limit: usize) -> Result<()> {
    let (pool, store) = open_store(cfg).await?;
    let runs = store.list_runs(limit).await?;

    if runs.is_empty() {
        println!("No ingestion runs.");
    } else {
        println!(
            "{:<38} {:<17} {:<10} {:>9}   {}",
            "RUN ID", "CREATED", "MODE", "MESSAGES", "LABEL"
        );
        println!("{}", "-".repeat(100));
        for run in &runs {
            println!(
                "{:<38} {:<17} {:<10} {:>9}   {}",
                run.run_id,
                run.created_at.format("%Y-%m-%d %H:%M"),
                run.mode.as_str(),
                run.message_count,
                run.label
            );
        }
    }

    pool.close().await;
    Ok(())
}

async fn run_clear(cfg: &Config, run: Option<String>, all: bool) -> Result<()> {
    let (pool, store) = open_store(cfg).await?;

    match (run, all) {
        (Some(run_id), false) => {
            let deleted = store.clear_run(&run_id).await?;
            println!("cleared run {}", run_id);
            println!("  deleted: {} messages", deleted);
        }
        (None, true) => {
            let deleted = store.clear_all().await?;
            println!("cleared index");
            println!("  deleted: {} messages", deleted);
        }
        _ => anyhow::bail!("pass exactly one of --run <id> or --all"),
    }

    pool.close().await;
    Ok(())
}

async fn run_status(cfg: &Config) -> Result<()> {
    let (pool, store) = open_store(cfg).await?;
    let embedder = create_embedder(&cfg.embedding)?;
    let index = VectorIndex::new(pool.clone(), embedder);

    let store_status = store.status().await?;
    let index_status = index.status().await?;
    let db_size = std::fs::metadata(&cfg.db.path).map(|m| m.len()).unwrap_or(0);

    println!("mailbrief — index status");
    println!("========================");
    println!();
    println!("  Database:   {}", cfg.db.path.display());
    println!("  Size:       {}", format_bytes(db_size));
    println!("  Encrypted:  {}", if cfg.crypto.enabled { "yes" } else { "no" });
    println!();
    println!("  Messages:   {}", store_status.message_count);
    println!("  Indexed:    {}", index_status.indexed_count);
    println!(
        "  Last write: {}",
        store_status
            .last_write
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string())
    );

    pool.close().await;
    Ok(())
}

async fn run_ask(cfg: &Config, question: &str, sources: Option<usize>) -> Result<()> {
    let (pool, store) = open_store(cfg).await?;
    let embedder = create_embedder(&cfg.embedding)?;
    let index = Arc::new(VectorIndex::new(pool.clone(), embedder));
    let synth = Arc::new(OllamaSynthesizer::new(&cfg.synthesis)?);
    let engine = AnswerEngine::new(store, index, synth, cfg.retrieval.clone());

    let max_sources = sources.unwrap_or(cfg.retrieval.max_sources);

    match engine.answer(question, max_sources).await {
        Ok(answer) => {
            print_answer(&answer);
        }
        Err(failure) => {
            eprintln!("Error: {}", failure.error);
            if let Some(detail) = failure.error.detail() {
                eprintln!("  detail: {}", detail);
            }
            if matches!(failure.error, Error::SynthesisFailed(_)) && !failure.sources.is_empty() {
                eprintln!();
                eprintln!("Retrieved sources (synthesis failed):");
                for (i, s) in failure.sources.iter().enumerate() {
                    eprintln!(
                        "[{}] score={:.4} subject={}",
                        i + 1,
                        s.score,
                        s.subject.as_deref().unwrap_or("(no subject)")
                    );
                }
            }
            pool.close().await;
            std::process::exit(1);
        }
    }

    pool.close().await;
    Ok(())
}

fn print_answer(answer: &Answer) {
    println!("Answer:");
    println!();
    println!("{}", answer.answer);

    if !answer.sources.is_empty() {
        println!();
        println!("--- Retrieved Sources ---");
        for (i, s) in answer.sources.iter().enumerate() {
            println!(
                "[{}] score={:.4} subject={}",
                i + 1,
                s.score,
                s.subject.as_deref().unwrap_or("(no subject)")
            );
            println!(
                "    from={} received={}",
                s.sender.as_deref().unwrap_or("unknown"),
                s.received_at
                    .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            );
            if let Some(ref link) = s.weblink {
                println!("    link={}", link);
            }
            println!("    {}", s.snippet);
            println!();
        }
    }

    println!("--- Latency Breakdown ---");
    println!("{:<14}: {} ms", "retrieval_ms", answer.retrieval_ms);
    println!("{:<14}: {} ms", "synthesis_ms", answer.synthesis_ms);
}

async fn run_serve(cfg: &Config) -> Result<()> {
    let (pool, store) = open_store(cfg).await?;
    let embedder = create_embedder(&cfg.embedding)?;
    let index = Arc::new(VectorIndex::new(pool.clone(), embedder));
    let synth = Arc::new(OllamaSynthesizer::new(&cfg.synthesis)?);
    let engine = Arc::new(AnswerEngine::new(
        store.clone(),
        index.clone(),
        synth,
        cfg.retrieval.clone(),
    ));

    server::run_server(
        &cfg.server.bind,
        store,
        index,
        engine,
        cfg.retrieval.max_sources,
    )
    .await
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
