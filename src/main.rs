//! # Insight Harness CLI (`insight`)
//!
//! ## Usage
//!
//! ```bash
//! insight --config ./config/insight.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `insight init` | Create the upload, plot and index directories |
//! | `insight profile <file>` | Print the column profile of a tabular file as JSON |
//! | `insight index <file>` | (Re)build the retrieval index of a document |
//! | `insight ask <file> "<question>"` | Answer a question about a file |
//! | `insight dashboard <file>...` | Synthesize KPIs, charts and insights as JSON |
//! | `insight upload <file> --owner <id>` | Store a file through the ingress gate |
//!
//! Logs go to stderr (`RUST_LOG`, default `insight=info,insight_harness=info`); results go
//! to stdout.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use insight_harness::config::{self, Config};
use insight_harness::dashboard::DashboardSynthesizer;
use insight_harness::embedding::create_embedder;
use insight_harness::index::IndexBuilder;
use insight_harness::ingress;
use insight_harness::models::{DataSource, SourceKind};
use insight_harness::orchestrator::Orchestrator;
use insight_harness::profile;
use insight_harness::render::SvgRenderer;

/// Owner recorded for sources named on the command line.
const CLI_OWNER: &str = "cli";

/// Insight Harness: ask questions about datasets and documents.
#[derive(Parser)]
#[command(
    name = "insight",
    about = "Insight Harness: question answering and dashboards over datasets and documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/insight.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the configured directories. Idempotent.
    Init,

    /// Profile a tabular file and print its schema as JSON.
    Profile {
        /// A `.csv`, `.xlsx` or `.xls` file.
        file: PathBuf,
    },

    /// Build (or rebuild) the retrieval index of a document.
    Index {
        /// A `.pdf`, `.txt` or `.epub` file.
        file: PathBuf,
    },

    /// Answer a question about a dataset or document.
    ///
    /// Tabular files are answered by the reasoning agent, documents by
    /// retrieval over their passage index (built on first use).
    Ask {
        file: PathBuf,
        question: String,
        /// Print the raw result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Synthesize a dashboard for one or more files and print it as JSON.
    Dashboard {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Do not render chart images.
        #[arg(long)]
        no_render: bool,
    },

    /// Copy a file into the upload root after checking its extension.
    Upload {
        file: PathBuf,
        /// Owner the upload is stored under.
        #[arg(long)]
        owner: String,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("insight=info,insight_harness=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn source_for(file: &Path) -> anyhow::Result<DataSource> {
    DataSource::from_path(file, CLI_OWNER).with_context(|| format!("Cannot use {}", file.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            for dir in [
                &cfg.paths.upload_root,
                &cfg.paths.plot_root,
                &cfg.paths.index_root,
            ] {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
            println!("Directories initialized successfully.");
        }
        Commands::Profile { file } => {
            let schema = profile::profile_path(&file)
                .with_context(|| format!("Cannot profile {}", file.display()))?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
        Commands::Index { file } => {
            let source = source_for(&file)?;
            if source.kind != SourceKind::Document {
                anyhow::bail!("{} is not a document", file.display());
            }
            let index = index_builder(&cfg)?
                .build(&source)
                .await
                .with_context(|| format!("Cannot index {}", file.display()))?;
            println!(
                "Indexed {} passages into {}",
                index.len(),
                index.manifest.collection
            );
        }
        Commands::Ask {
            file,
            question,
            json,
        } => {
            let source = source_for(&file)?;
            let orchestrator = Orchestrator::from_config(&cfg)?;
            let result = orchestrator.answer(&source, &question).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", result.answer_text);
                for url in &result.chart_refs {
                    println!("Chart: {}", url);
                }
            }
        }
        Commands::Dashboard { files, no_render } => {
            let mut sources = Vec::with_capacity(files.len());
            for file in &files {
                match source_for(file) {
                    Ok(source) => sources.push(source),
                    Err(e) => {
                        warn!(file = %file.display(), error = %format!("{:#}", e), "skipping file")
                    }
                }
            }
            let mut synthesizer = DashboardSynthesizer::new(&cfg.profiler, &cfg.dashboard);
            if !no_render {
                synthesizer = synthesizer.with_renderer(Arc::new(SvgRenderer::new(&cfg.paths)));
            }
            let mut dashboard = synthesizer.synthesize(&sources);
            dashboard.summary.total_files = files.len();
            println!("{}", serde_json::to_string_pretty(&dashboard)?);
        }
        Commands::Upload { file, owner } => {
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow::anyhow!("Invalid file name: {}", file.display()))?;
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let source = ingress::store_upload(&cfg.paths, &owner, filename, &bytes)?;
            println!("{}", serde_json::to_string_pretty(&source)?);
        }
    }

    Ok(())
}

fn index_builder(cfg: &Config) -> anyhow::Result<IndexBuilder> {
    let embedder = create_embedder(&cfg.embedding)?;
    Ok(IndexBuilder::new(
        &cfg.paths.index_root,
        &cfg.chunking,
        &cfg.retrieval,
        embedder,
    ))
}
