//! Carto CLI — thin argument-parsing shell over `carto-core`.
//!
//! Builds a `PipelineConfig` from flags, drives the `Orchestrator`, and
//! renders phase progress. No logic lives here beyond that contract.

use std::path::PathBuf;

use clap::Parser;

use carto_core::orchestrator::{Orchestrator, PipelineConfig};
use carto_core::Config;

/// Carto — codebase-intelligence indexer.
#[derive(Parser)]
#[command(name = "carto", version, about)]
struct Cli {
    /// Project root to index (default: current directory)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Project name used in store tags (default: root directory name)
    #[arg(long)]
    project: Option<String>,

    /// Restrict indexing to these modules (by name). Repeatable.
    #[arg(long = "module")]
    modules: Vec<String>,

    /// Maximum concurrent fan-out per phase
    #[arg(long, default_value = "4")]
    max_workers: usize,

    /// Re-index every file, ignoring the manifest
    #[arg(long)]
    full: bool,

    /// Output the final result as JSON instead of a human-readable summary
    #[arg(long)]
    json: bool,
}

fn resolve_root(root: Option<PathBuf>) -> PathBuf {
    root.unwrap_or_else(|| std::env::current_dir().expect("could not determine current directory"))
        .canonicalize()
        .expect("root path not found")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("carto=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let root = resolve_root(cli.root);
    let project = cli.project.unwrap_or_else(|| {
        root.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("project")
            .to_string()
    });

    let mut pipeline_config = PipelineConfig::new(root, project);
    pipeline_config.module_filter = cli.modules;
    pipeline_config.max_workers = cli.max_workers.max(1);
    pipeline_config.incremental = !cli.full;

    let orchestrator = Orchestrator::new(Config::from_env(), pipeline_config).with_progress(Box::new(
        |phase, done, total| {
            eprintln!("[{phase}] {done}/{total}");
        },
    ));

    match orchestrator.run().await {
        Ok(result) => {
            if cli.json {
                let output = serde_json::json!({
                    "files_indexed": result.files_indexed,
                    "modules_indexed": result.modules_indexed,
                    "errors": result.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
                    "synthesis": result.synthesis,
                });
                println!("{}", serde_json::to_string_pretty(&output).unwrap());
            } else {
                println!("Indexed {} file(s) across {} module(s)", result.files_indexed, result.modules_indexed.len());
                if !result.errors.is_empty() {
                    eprintln!("\n{} non-fatal error(s):", result.errors.len());
                    for err in &result.errors {
                        eprintln!("  - {err}");
                    }
                }
            }
        }
        Err(e) => {
            eprintln!("carto: {e}");
            std::process::exit(1);
        }
    }
}
