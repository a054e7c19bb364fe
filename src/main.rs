//! # testgen CLI
//!
//! Builds a knowledge index from product documentation and generates
//! grounded test cases and UI automation scripts from it.
//!
//! ## Usage
//!
//! ```bash
//! testgen --config ./config/testgen.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `testgen init` | Create the SQLite database and schema |
//! | `testgen index <paths…>` | Parse, chunk and embed documents |
//! | `testgen search "<query>"` | Show the top-k chunks for a query |
//! | `testgen cases "<request>"` | Generate grounded test cases (JSON) |
//! | `testgen script <id> --markup page.html` | Generate an automation script |
//! | `testgen status` | Print the current phase and counts |
//! | `testgen reset` | Drop the index and all generated artifacts |
//! | `testgen serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! testgen index docs/ --rebuild
//! testgen cases "discount code validation" --k 4
//! testgen script TC001 --markup checkout.html --out test_tc001.py
//! ```
//!
//! Logs go to stderr and are filtered with `RUST_LOG`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use rag_testgen::config::{self, Config};
use rag_testgen::migrate;
use rag_testgen::models::SourceDocument;
use rag_testgen::parse::DocumentFormat;
use rag_testgen::pipeline::Pipeline;
use rag_testgen::server;

#[derive(Parser)]
#[command(
    name = "testgen",
    about = "Generate grounded test cases and automation scripts from product documentation",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./config/testgen.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and schema (idempotent).
    Init,

    /// Parse, chunk and embed documents into the index.
    Index {
        /// Files or directories (walked recursively).
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Replace the index (and generated artifacts) instead of appending.
        #[arg(long)]
        rebuild: bool,

        /// Format tag for every file, overriding extension detection.
        #[arg(long)]
        format: Option<String>,
    },

    /// Show the chunks most similar to a query.
    Search {
        query: String,

        #[arg(long)]
        k: Option<usize>,
    },

    /// Generate grounded test cases for a request and print them as JSON.
    Cases {
        request: String,

        /// Number of chunks to retrieve as context.
        #[arg(long)]
        k: Option<usize>,

        /// Character budget for retrieved context.
        #[arg(long)]
        context_chars: Option<usize>,
    },

    /// Generate an automation script for a stored test case.
    Script {
        test_case_id: String,

        /// HTML of the page under test.
        #[arg(long)]
        markup: PathBuf,

        #[arg(long)]
        k: Option<usize>,

        /// Write the script here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Print the current phase and store counts.
    Status,

    /// Drop the index and all generated artifacts.
    Reset,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Expand files and directories into upload documents.
///
/// Files found under a directory are identified by their path relative to
/// that directory, so `a/readme.md` and `b/readme.md` stay distinct.
fn collect_documents(paths: &[PathBuf], format: Option<&str>) -> Result<Vec<SourceDocument>> {
    let forced = format.map(str::parse::<DocumentFormat>).transpose()?;
    let mut files = Vec::new();

    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry?;
                if entry.file_type().is_file() {
                    let id = relative_source_id(path, entry.path());
                    files.push((id, entry.into_path()));
                }
            }
        } else if path.is_file() {
            files.push((file_source_id(path), path.clone()));
        } else {
            bail!("No such file or directory: {}", path.display());
        }
    }

    files
        .into_iter()
        .map(|(id, file)| {
            let content = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let format = forced.unwrap_or_else(|| DocumentFormat::from_path(&file));
            Ok(SourceDocument::new(id, format, content))
        })
        .collect()
}

fn file_source_id(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn relative_source_id(root: &Path, file: &Path) -> String {
    match file.strip_prefix(root) {
        Ok(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => file_source_id(file),
    }
}

async fn run(cli: Cli, cfg: Config) -> Result<()> {
    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }
    if let Commands::Serve = cli.command {
        return server::run_server(&cfg).await;
    }

    let pipeline = Pipeline::from_config(&cfg).await?;
    let outcome = run_with_pipeline(&pipeline, cli.command).await;
    pipeline.close().await;
    outcome
}

async fn run_with_pipeline(pipeline: &Pipeline, command: Commands) -> Result<()> {
    match command {
        Commands::Index {
            paths,
            rebuild,
            format,
        } => {
            let documents = collect_documents(&paths, format.as_deref())?;
            let report = pipeline.build_index(documents, rebuild).await?;
            println!("documents: {}", report.documents);
            println!("chunks added: {}", report.chunks_added);
        }
        Commands::Search { query, k } => {
            let result = pipeline.search(&query, k).await?;
            for (rank, hit) in result.hits.iter().enumerate() {
                let preview: String = hit.chunk.text.chars().take(160).collect();
                println!(
                    "{}. [{:.4}] {}#{}\n   {}",
                    rank + 1,
                    hit.score,
                    hit.chunk.source_id,
                    hit.chunk.chunk_index,
                    preview
                );
            }
        }
        Commands::Cases {
            request,
            k,
            context_chars,
        } => {
            let cases = pipeline
                .generate_test_cases(&request, k, context_chars)
                .await?;
            println!("{}", serde_json::to_string_pretty(&cases)?);
        }
        Commands::Script {
            test_case_id,
            markup,
            k,
            out,
        } => {
            let page = std::fs::read_to_string(&markup)
                .with_context(|| format!("Failed to read markup {}", markup.display()))?;
            let artifact = pipeline.generate_script(&test_case_id, &page, k).await?;
            match out {
                Some(path) => {
                    std::fs::write(&path, &artifact.text)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("script {} written to {}", artifact.id, path.display());
                }
                None => println!("{}", artifact.text),
            }
        }
        Commands::Status => {
            let counts = pipeline.counts().await?;
            println!("phase: {}", counts.phase());
            println!("records: {}", counts.records);
            println!("test cases: {}", counts.test_cases);
            println!("scripts: {}", counts.scripts);
        }
        Commands::Reset => {
            pipeline.reset().await?;
            println!("Index reset. phase: EMPTY");
        }
        Commands::Init | Commands::Serve => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    run(cli, cfg).await
}
