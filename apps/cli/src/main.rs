//! cloudhaul CLI: dry-run planning and config validation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cloudhaul_orchestrator::OrchestratorConfig;
use cloudhaul_orchestrator::plan::{BatchWork, plan_work};
use cloudhaul_planner::{FilterMode, LaneAssignment, ListedFile, Tooling, assign, tag_files};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cloudhaul", version, about = "Bulk cloud-to-cloud transfer planning")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show how a listing would be split into lanes and batches.
    Plan {
        /// JSON array of `{"path": .., "size": ..}` entries.
        #[arg(long)]
        manifest: PathBuf,
        #[arg(long, default_value = "cloudhaul.toml")]
        config: PathBuf,
        /// none, smart or code_clean. Defaults to the configured mode.
        #[arg(long, value_parser = parse_filter_mode)]
        filter_mode: Option<FilterMode>,
        /// Print the plan as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Load and validate a configuration file.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

fn parse_filter_mode(s: &str) -> Result<FilterMode, String> {
    serde_json::from_value(serde_json::Value::String(s.replace('-', "_")))
        .map_err(|_| format!("unknown filter mode '{s}' (expected none, smart or code_clean)"))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanReport {
    filter_mode: FilterMode,
    files: usize,
    bytes: u64,
    ignored: usize,
    lanes: Vec<LaneReport>,
    batches: Vec<BatchReport>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LaneReport {
    lane: String,
    files: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchReport {
    lane: String,
    index: usize,
    files: usize,
    bytes: u64,
    estimated_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tooling: Option<Tooling>,
}

fn build_report(mode: FilterMode, lanes: &LaneAssignment, work: &[BatchWork]) -> PlanReport {
    PlanReport {
        filter_mode: mode,
        files: lanes.len(),
        bytes: lanes.total_bytes(),
        ignored: lanes.ignored(),
        lanes: lanes
            .iter()
            .map(|(lane, files)| LaneReport {
                lane: lane.to_string(),
                files: files.len(),
            })
            .collect(),
        batches: work
            .iter()
            .map(|w| BatchReport {
                lane: w.batch.lane.to_string(),
                index: w.batch.index,
                files: w.batch.files.len(),
                bytes: w.batch.total_bytes,
                estimated_bytes: w.estimated_bytes,
                tooling: w.tooling,
            })
            .collect(),
    }
}

fn plan(
    manifest: &Path,
    config: &Path,
    filter_mode: Option<FilterMode>,
) -> Result<(PlanReport, Vec<BatchWork>)> {
    let config = OrchestratorConfig::load(config)?;
    let content = std::fs::read_to_string(manifest)
        .with_context(|| format!("reading manifest {}", manifest.display()))?;
    let listing: Vec<ListedFile> = serde_json::from_str(&content)
        .with_context(|| format!("parsing manifest {}", manifest.display()))?;

    let mode = filter_mode.unwrap_or(config.job_defaults.filter_mode);
    let files = tag_files(listing, mode, &config.tagging)?;
    let lanes = assign(files);
    let work = plan_work(
        &lanes,
        &config.batching,
        &Default::default(),
        &Default::default(),
    )?;
    info!(files = lanes.len(), batches = work.len(), "plan built");
    Ok((build_report(mode, &lanes, &work), work))
}

fn print_report(report: &PlanReport, work: &[BatchWork]) {
    println!(
        "{} files, {} bytes ({} ignored)",
        report.files, report.bytes, report.ignored
    );
    for lane in &report.lanes {
        println!("  {:<8} {:>6} files", lane.lane, lane.files);
    }
    println!("{} batches", report.batches.len());
    for batch in &report.batches {
        println!(
            "  {}#{:<4} {:>5} files {:>14} bytes -> ~{} bytes",
            batch.lane, batch.index, batch.files, batch.bytes, batch.estimated_bytes
        );
    }
    for plan in work.iter().flat_map(|w| &w.conversions) {
        println!(
            "  convert {} {} -> {} (~{} bytes)",
            plan.source_path, plan.input_format, plan.output_format, plan.estimated_size
        );
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Plan {
            manifest,
            config,
            filter_mode,
            json,
        } => {
            let (report, work) = plan(&manifest, &config, filter_mode)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report, &work);
            }
        }
        Commands::CheckConfig { config } => {
            if !config.exists() {
                anyhow::bail!("config file not found: {}", config.display());
            }
            let loaded = OrchestratorConfig::load(&config)?;
            println!(
                "{}: ok ({} accounts, {} in-flight batches)",
                config.display(),
                loaded.quota.accounts.len(),
                loaded.batching.max_in_flight_batches
            );
        }
    }
    Ok(())
}
