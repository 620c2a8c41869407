//! # docchat CLI
//!
//! ## Usage
//!
//! ```bash
//! docchat --config ./config/docchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat index <PATH>...` | Extract, chunk, embed and persist an index |
//! | `docchat ask "<question>" --doc <PATH>...` | Answer one question |
//! | `docchat chat --doc <PATH>...` | Interactive question loop |
//! | `docchat inspect` | Show the persisted index header |
//! | `docchat reset` | Remove the persisted index |
//!
//! Results go to stdout; diagnostics go to stderr (`-v`, `-vv`, or `RUST_LOG`).

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use docchat::cache::IndexCache;
use docchat::config::{self, Config};
use docchat::session::{Exchange, Session};
use docchat::store::{IndexStore, SqliteIndexStore};
use docchat::Error;

/// docchat: grounded question answering over your documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Credentials are read from `GOOGLE_API_KEY` / `OPENAI_API_KEY`.
#[derive(Parser)]
#[command(name = "docchat", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docchat.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and persist the index for a set of documents.
    ///
    /// Directories are walked for PDF, DOCX, PPTX, XLSX, Markdown and text
    /// files. Documents that fail to extract are reported and skipped.
    Index {
        /// Files or directories.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Ask a single question about a set of documents.
    ///
    /// Reuses the persisted index when it was built from the same
    /// documents and settings.
    Ask {
        question: String,

        /// Files or directories to answer from.
        #[arg(long = "doc", required = true)]
        docs: Vec<PathBuf>,

        /// Write the exchange to this CSV file.
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Interactive session reading questions from stdin.
    ///
    /// Commands: `:undo`, `:history`, `:export FILE`, `:reset`, `:quit`.
    Chat {
        #[arg(long = "doc", required = true)]
        docs: Vec<PathBuf>,
    },

    /// Print the persisted index header and its documents.
    Inspect,

    /// Remove the persisted index. Safe to run repeatedly.
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    docchat::logging::init(cli.verbose);

    match cli.command {
        Commands::Inspect => run_inspect(&load_or_default(&cli.config)?).await,
        Commands::Reset => run_reset(&load_or_default(&cli.config)?).await,
        Commands::Index { paths } => {
            let mut session = open_session(&cli.config, &paths)?;
            let index = session.ensure_index().await?;
            println!(
                "Indexed {} chunks from {} documents ({} dimensions).",
                index.len(),
                index.documents().len(),
                index.dimension()
            );
            println!("Index stored at {}", session.store().path().display());
            Ok(())
        }
        Commands::Ask {
            question,
            docs,
            export,
        } => {
            let mut session = open_session(&cli.config, &docs)?;
            match session.ask(&question).await {
                Ok(exchange) => print_exchange(&exchange),
                Err(e) => bail!(describe_failure(&e)),
            }
            if let Some(path) = export {
                write_export(&session, &path)?;
            }
            Ok(())
        }
        Commands::Chat { docs } => {
            let session = open_session(&cli.config, &docs)?;
            run_chat(session).await
        }
    }
}

/// `inspect` and `reset` never call a provider, so they run on defaults
/// when no config file exists. An existing but invalid file is an error.
fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        Ok(Config::minimal())
    }
}

fn open_session(config_path: &Path, docs: &[PathBuf]) -> Result<Session<SqliteIndexStore>> {
    let cfg = config::load_config(config_path)?;
    let mut session = Session::from_config(cfg)?;
    let failures = session
        .upload_paths(docs)
        .context("No documents could be read")?;
    for failure in &failures {
        eprintln!("warning: {}", failure);
    }
    Ok(session)
}

/// Keep "the model could not answer" and "the call failed" apart.
fn describe_failure(error: &Error) -> String {
    match error {
        Error::LanguageService(detail) => format!("Answer generation failed: {}", detail),
        Error::Timeout { .. } => format!("Answer generation failed: {}", error),
        other => other.to_string(),
    }
}

fn print_exchange(exchange: &Exchange) {
    println!("{}", exchange.answer.display_text());
    if exchange.answer.is_not_in_context() {
        println!("(no answer in the provided documents)");
    }
    let sources: Vec<String> = exchange.chunks.iter().map(|c| c.id()).collect();
    if !sources.is_empty() {
        println!();
        println!("Sources: {}", sources.join(", "));
    }
}

fn write_export<S: IndexStore>(session: &Session<S>, path: &Path) -> Result<()> {
    let csv = session.export_csv()?;
    std::fs::write(path, csv)
        .with_context(|| format!("Failed to write export: {}", path.display()))?;
    println!("Exported {} turns to {}", session.history().len(), path.display());
    Ok(())
}

async fn run_chat(mut session: Session<SqliteIndexStore>) -> Result<()> {
    println!(
        "Loaded {} documents. Ask a question, or :undo, :history, :export FILE, :reset, :quit.",
        session.documents().len()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').unwrap_or((line, "")) {
            (":quit", _) | (":q", _) => break,
            (":undo", _) => {
                if session.undo() {
                    println!("Removed the last question and answer.");
                } else {
                    println!("Nothing to undo.");
                }
            }
            (":history", _) => {
                for turn in session.history().turns() {
                    println!(
                        "[{}] {}: {}",
                        turn.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        turn.role,
                        turn.text.trim()
                    );
                }
            }
            (":export", path) if !path.trim().is_empty() => {
                if let Err(e) = write_export(&session, Path::new(path.trim())) {
                    eprintln!("error: {:#}", e);
                }
            }
            (":export", _) => println!("usage: :export FILE"),
            (":reset", _) => {
                session.reset().await?;
                println!("Session cleared. Restart with --doc to load documents again.");
                break;
            }
            _ => match session.ask(line).await {
                Ok(exchange) => print_exchange(&exchange),
                Err(e) => eprintln!("{}", describe_failure(&e)),
            },
        }
    }
    Ok(())
}

async fn run_inspect(cfg: &Config) -> Result<()> {
    let store = SqliteIndexStore::new(cfg.store.path.clone());
    let meta = match store.meta().await {
        Ok(meta) => meta,
        Err(Error::IndexNotFound(location)) => {
            println!("No index at {}", location);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let index = store.load().await?;

    println!("Location:   {}", store.path().display());
    println!("Model:      {}", meta.model);
    println!("Dimension:  {}", meta.dimension);
    println!("Entries:    {}", meta.count);
    println!("Built at:   {}", meta.built_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Documents:");
    for name in index.documents() {
        let chunks = index
            .entries()
            .iter()
            .filter(|e| e.chunk.document == name)
            .count();
        println!("  {} ({} chunks)", name, chunks);
    }
    Ok(())
}

async fn run_reset(cfg: &Config) -> Result<()> {
    let mut cache = IndexCache::new(SqliteIndexStore::new(cfg.store.path.clone()));
    cache.reset().await?;
    println!("Index removed from {}", cfg.store.path.display());
    Ok(())
}
