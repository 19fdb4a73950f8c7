use anyhow::{Context, Result};
use chapterizer::{ChapterSource, Config, JobOrchestrator, PipelineComponents, ProcessingMode};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chapterizer")]
#[command(version, about = "Transcript to chapters content pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to chapterizer.toml or config/chapterizer.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a subject and wait for the job to finish
    Process {
        subject_id: String,
        /// simple, detailed or detailed_with_screenshots
        #[arg(long, default_value = "detailed")]
        mode: ProcessingMode,
        /// auto or description
        #[arg(long, default_value = "auto")]
        chapter_source: ChapterSource,
    },
    /// Show a job snapshot
    Status { job_id: String },
    /// Show the most recent job for a subject
    Latest { subject_id: String },
    /// Print the completed result for a subject
    Result {
        subject_id: String,
        #[arg(long, default_value = "detailed")]
        mode: ProcessingMode,
        #[arg(long, default_value = "auto")]
        chapter_source: ChapterSource,
    },
    /// Cancel a processing job
    Cancel { job_id: String },
    /// Delete a job snapshot and its screenshots
    Cleanup { job_id: String },
    /// Remove cached artifacts past the retention window
    Sweep,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::load()?,
    };

    // RUST_LOG wins over the configured filter
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Config => {
            println!("{}", config.summary());
            Ok(())
        }
        command => run(command, config).await,
    }
}

async fn run(command: Commands, config: Config) -> Result<()> {
    let components = PipelineComponents::from_config(&config)?;
    let orchestrator = JobOrchestrator::new(config, components).await?;

    match command {
        Commands::Process {
            subject_id,
            mode,
            chapter_source,
        } => {
            let start_time = std::time::Instant::now();
            let job = orchestrator.process(&subject_id, mode, chapter_source).await?;
            info!("🎉 Job {} finished as {} in {:.2}s", job.job_id, job.status, start_time.elapsed().as_secs_f64());
            print_json(&job)?;
        }
        Commands::Status { job_id } => print_json(&orchestrator.status(&job_id).await?)?,
        Commands::Latest { subject_id } => print_json(&orchestrator.latest_for_subject(&subject_id).await?)?,
        Commands::Result {
            subject_id,
            mode,
            chapter_source,
        } => print_json(&orchestrator.completed_result(&subject_id, mode, chapter_source).await?)?,
        Commands::Cancel { job_id } => {
            if orchestrator.cancel(&job_id).await? {
                info!("🛑 Job {} cancelled", job_id);
            } else {
                info!("Job {} is not processing, nothing to cancel", job_id);
            }
        }
        Commands::Cleanup { job_id } => {
            let removed = orchestrator.cleanup(&job_id).await;
            info!("🧹 Cleanup of {}: {}", job_id, if removed { "removed" } else { "nothing to remove" });
        }
        Commands::Sweep => {
            let removed = orchestrator.sweep_cache().await?;
            info!("🧹 Removed {} expired cache entries", removed);
        }
        // printed by main without building collaborators
        Commands::Config => {}
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
