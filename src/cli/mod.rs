//! CLI parser and command dispatch.
//!
//! Results are printed to stdout as JSON; status lines and logs go to stderr.

mod progress;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use serde::Serialize;
use tokio::sync::mpsc;

use animescrape::bulk::BulkJobOrchestrator;
use animescrape::config::Settings;
use animescrape::pipeline::{AllEpisodesOptions, ExtractionPipeline, ScrapeOptions};
use animescrape::store::SqliteStore;

use progress::ChunkProgress;

#[derive(Parser)]
#[command(name = "animescrape")]
#[command(about = "Locate and extract episode stream URLs")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database for jobs and scraped episodes
    #[arg(long, global = true, env = "SCRAPER_DATABASE")]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

/// Per-call overrides of the configured retry policy.
#[derive(clap::Args, Clone, Copy)]
struct AttemptArgs {
    /// Per-stage timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Attempts per episode, including the first
    #[arg(long)]
    retries: Option<u32>,
}

impl AttemptArgs {
    fn options(&self, settings: &Settings) -> ScrapeOptions {
        ScrapeOptions {
            timeout: self
                .timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| settings.navigation_timeout()),
            retries: self.retries.unwrap_or(settings.retries),
            retry_delay: settings.retry_delay(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape a single episode
    Episode {
        /// Anime title as it appears on the site
        title: String,
        /// Episode number (1-based)
        episode: u32,
        #[command(flatten)]
        attempt: AttemptArgs,
    },

    /// Scrape every listed episode of a series
    All {
        title: String,
        /// Stop after this many episodes
        #[arg(short, long)]
        max_episodes: Option<u32>,
        /// Episodes scraped side by side
        #[arg(short, long)]
        parallel: Option<usize>,
        #[command(flatten)]
        attempt: AttemptArgs,
    },

    /// Chunked bulk jobs for long series
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// Create or reset a bulk job
    Start {
        anime_id: String,
        title: String,
        /// Total number of episodes
        total: u32,
        /// Episodes per chunk
        #[arg(long)]
        chunk_size: Option<u32>,
    },

    /// Run one chunk of a job
    Chunk {
        job_id: String,
        /// 1-based chunk number
        chunk: u32,
        /// Hide the progress bar
        #[arg(short, long)]
        quiet: bool,
        #[command(flatten)]
        attempt: AttemptArgs,
    },

    /// Show job progress
    Status { job_id: String },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).await?;
    if let Some(database) = cli.database {
        settings.database = Some(database);
    }

    match cli.command {
        Commands::Episode {
            title,
            episode,
            attempt,
        } => {
            let pipeline = ExtractionPipeline::from_settings(&settings)?;
            let result = pipeline
                .scrape_episode(&title, episode, attempt.options(&settings))
                .await;
            pipeline.shutdown().await;
            print_json(&result)?;
            if !result.success {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::All {
            title,
            max_episodes,
            parallel,
            attempt,
        } => {
            let pipeline = ExtractionPipeline::from_settings(&settings)?;
            let options = AllEpisodesOptions {
                max_episodes: max_episodes.unwrap_or(settings.max_episodes),
                scrape: attempt.options(&settings),
                parallelism: parallel.unwrap_or(settings.series_parallelism),
            };
            let result = pipeline.scrape_all_episodes(&title, options).await;
            pipeline.shutdown().await;
            eprintln!(
                "{} {} scraped, {} failed",
                style("✓").green(),
                result.scraped_episodes,
                result.failed_episodes
            );
            print_json(&result)
        }
        Commands::Job { command } => run_job(&settings, command).await,
    }
}

async fn run_job(settings: &Settings, command: JobCommands) -> anyhow::Result<()> {
    let db_path = settings.database_path();
    let store = Arc::new(
        SqliteStore::open(&db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?,
    );
    // Building the pipeline is cheap; the browser only launches on first render
    let pipeline = Arc::new(ExtractionPipeline::from_settings(settings)?);
    let mut bulk = BulkJobOrchestrator::new(pipeline.clone(), store)
        .with_episode_delay(settings.episode_delay());

    match command {
        JobCommands::Start {
            anime_id,
            title,
            total,
            chunk_size,
        } => {
            let chunk_size = chunk_size.unwrap_or(settings.chunk_size);
            let job_id = bulk.start_job(&anime_id, &title, total, chunk_size).await?;
            let status = bulk.job_status(&job_id).await?;
            eprintln!(
                "{} Job {} created: {} chunks of {}",
                style("✓").green(),
                job_id,
                status.progress.total_chunks,
                chunk_size
            );
            eprintln!(
                "  {} Run 'animescrape job chunk {} 1' to begin",
                style("→").dim(),
                job_id
            );
            print_json(&status)
        }
        JobCommands::Chunk {
            job_id,
            chunk,
            quiet,
            attempt,
        } => {
            bulk = bulk.with_scrape_options(attempt.options(settings));

            let watcher = if quiet {
                None
            } else {
                let (tx, rx) = mpsc::channel(64);
                bulk = bulk.with_events(tx);
                let status = bulk.job_status(&job_id).await?;
                let size = status
                    .progress
                    .chunk_range(chunk)
                    .map(|r| r.end() - r.start() + 1)
                    .unwrap_or(0);
                Some(tokio::spawn(ChunkProgress::new(size).run(rx)))
            };

            let result = bulk.scrape_chunk(&job_id, chunk).await;
            drop(bulk);
            if let Some(watcher) = watcher {
                let _ = watcher.await;
            }
            pipeline.shutdown().await;

            let result = result?;
            if let Some(next) = result.progress.next_chunk {
                eprintln!(
                    "  {} Next: 'animescrape job chunk {} {}'",
                    style("→").dim(),
                    job_id,
                    next
                );
            }
            print_json(&result)
        }
        JobCommands::Status { job_id } => {
            let status = bulk.job_status(&job_id).await?;
            print_json(&status)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize result")?;
    println!("{}", json);
    Ok(())
}
