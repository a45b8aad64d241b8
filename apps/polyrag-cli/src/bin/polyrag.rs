use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use polyrag_core::config::Config;
use polyrag_core::data_processor::collect_files;
use polyrag_core::health::HealthStatus;
use polyrag_core::types::{Modality, SearchResult};
use polyrag_hybrid::{build_pipeline_in, IngestReport, Pipeline, SearchRequest};

#[derive(Parser)]
#[command(name = "polyrag", version, about = "Multi-modal retrieval over local text, images and tables")]
struct Cli {
    /// Directory holding config.toml / config.<env>.toml
    #[arg(long, global = true, default_value = ".")]
    config_dir: PathBuf,
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index every supported file under a directory
    Ingest { dir: PathBuf },
    /// Index one file as the given content type (text, json, image, tabular)
    Index {
        content_type: String,
        path: PathBuf,
        #[arg(long)]
        description: Option<String>,
    },
    /// Search with query enhancement, fusion and re-ranking
    Search {
        query: String,
        #[arg(short = 'k', long, default_value_t = 10)]
        top_k: usize,
        /// Restrict to one modality (text, image, structured)
        #[arg(short, long)]
        modality: Option<Modality>,
    },
    /// Find indexed images similar to an image file
    SearchImage {
        path: PathBuf,
        #[arg(short = 'k', long, default_value_t = 10)]
        top_k: usize,
    },
    /// Report per-modality health
    Health,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = Config::load_from(&cli.config_dir, None).map_err(|e| {
        eprintln!("Error loading config: {e}");
        e
    })?;
    let settings = config.settings()?;
    debug!(config_dir = %cli.config_dir.display(), store = ?settings.store.backend, "configuration loaded");
    let pipeline = build_pipeline_in(&settings, &cli.config_dir).await.context("failed to start retrieval pipeline")?;

    match cli.command {
        Command::Ingest { dir } => ingest(&pipeline, &dir, cli.json).await,
        Command::Index { content_type, path, description } => {
            let ids = pipeline.retriever.index_content(&content_type, &path, description.as_deref()).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&ids)?);
            } else {
                println!("✅ Indexed {} chunk(s) from {}", ids.len(), path.display());
            }
            Ok(())
        }
        Command::Search { query, top_k, modality } => {
            let request = SearchRequest::new(top_k).with_modality(modality);
            let response = pipeline.orchestrator.search_detailed(&query, request).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                if response.working_query != response.query {
                    println!("🔎 Searching for: {}", response.working_query);
                }
                print_results(&response.results);
                println!("\n⏱  {:.1} ms", response.timings.total_ms);
            }
            Ok(())
        }
        Command::SearchImage { path, top_k } => {
            let results = pipeline.retriever.search_by_image(&path, top_k).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_results(&results);
            }
            Ok(())
        }
        Command::Health => {
            let report = pipeline.orchestrator.health().await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for c in &report.components {
                    let detail = c.detail.as_deref().map(|d| format!(" ({d})")).unwrap_or_default();
                    println!("{} {:<12} {:?}{detail}", status_icon(c.status), c.name, c.status);
                    for event in &c.degradations {
                        println!("     ↳ {} fell back to {}: {}", event.component, event.fallback_used, event.failure);
                    }
                }
                println!("\nOverall: {:?}", report.status);
            }
            if report.status == HealthStatus::Unhealthy {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn ingest(pipeline: &Pipeline, dir: &Path, json: bool) -> anyhow::Result<()> {
    anyhow::ensure!(dir.is_dir(), "{} is not a directory", dir.display());
    let files = collect_files(dir);
    if !json {
        println!("Data directory: {}", dir.display());
    }
    let bar = if json { ProgressBar::hidden() } else { ProgressBar::new(files.len() as u64) };
    bar.set_style(ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?);
    let report = pipeline
        .retriever
        .ingest_files(files, |path| {
            bar.set_message(path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default());
            bar.inc(1);
        })
        .await;
    bar.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
        return Ok(());
    }
    println!("\n✅ Ingest completed");
    for (modality, chunks) in &report.indexed {
        println!("📊 {modality}: {chunks} chunk(s)");
    }
    println!("📁 {} file(s) indexed, {} skipped", report.files_indexed, report.skipped.len());
    for (path, reason) in &report.failed {
        println!("⚠️  {}: {reason}", path.display());
    }
    Ok(())
}

fn report_json(report: &IngestReport) -> serde_json::Value {
    serde_json::json!({
        "indexed": report.indexed.iter().map(|(m, n)| (m.to_string(), serde_json::Value::from(*n))).collect::<serde_json::Map<_, _>>(),
        "files_indexed": report.files_indexed,
        "total_chunks": report.total_chunks(),
        "skipped": report.skipped,
        "failed": report.failed.iter().map(|(p, e)| serde_json::json!({ "path": p, "error": e })).collect::<Vec<_>>(),
    })
}

fn print_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }
    for r in results {
        let title = r.chunk.metadata.title.as_deref().unwrap_or(&r.chunk.document_id);
        let sources: Vec<&str> = r.sources.iter().map(|m| m.as_str()).collect();
        println!("{:>3}. [{:.4}] {} ({})", r.rank, r.score, title, sources.join("+"));
        let preview: String = r.chunk.content.chars().take(160).collect();
        println!("     {}", preview.replace('\n', " "));
    }
}

fn status_icon(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "✅",
        HealthStatus::Degraded => "⚠️ ",
        HealthStatus::Unhealthy => "❌",
    }
}
