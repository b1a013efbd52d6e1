//! Binary entry point for regscan-rs.
//!
//! Runs the background worker pool, initializes the database, and
//! reports engine status. Exits 0 on graceful shutdown; any uncaught
//! worker panic surfaces as a non-zero exit.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use regscan_rs::config::Config;
use regscan_rs::prompts::PromptSet;
use regscan_rs::provider::{
    DryRunTicketing, GitCliSource, OpenAiProvider, Providers, StaticTokenSource,
};
use regscan_rs::queue::WorkerPool;
use regscan_rs::store::{shared, SqliteStore};
use regscan_rs::Service;

#[derive(Parser)]
#[command(name = "regscan-rs", version, about = "Regulation-compliance code auditor")]
struct Cli {
    /// Database path override.
    #[arg(long, env = "REGSCAN_DATABASE_PATH")]
    database: Option<PathBuf>,

    /// Prompt template directory override.
    #[arg(long, env = "REGSCAN_PROMPT_DIR")]
    prompt_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    Init,
    /// Run the background worker pool until interrupted.
    Worker {
        /// Number of parallel workers.
        #[arg(long, env = "REGSCAN_WORKER_COUNT")]
        workers: Option<usize>,
    },
    /// Print store statistics as JSON.
    Status,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env().context("invalid configuration")?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    match cli.command {
        Commands::Init => {
            let mut store = SqliteStore::open(&config.database_path)?;
            store.init()?;
            println!(
                "initialized {}",
                config.database_path.display()
            );
            Ok(())
        }
        Commands::Status => {
            let mut store = SqliteStore::open(&config.database_path)?;
            store.init()?;
            let stats = store.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Commands::Worker { workers } => {
            if let Some(n) = workers {
                config.worker_count = n;
            }
            run_worker(config, cli.prompt_dir.as_deref())
        }
    }
}

fn run_worker(config: Config, prompt_dir: Option<&std::path::Path>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    runtime.block_on(async {
        let mut store = SqliteStore::open(&config.database_path)?;
        store.init()?;
        let store = shared(store);

        let api_key = std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY is not set")?;
        let git_token = std::env::var("REGSCAN_GIT_TOKEN").unwrap_or_default();
        let openai = Arc::new(OpenAiProvider::new(&api_key, config.embedding_dimension));

        let providers = Providers {
            embeddings: openai.clone(),
            llm: openai,
            tickets: Arc::new(DryRunTicketing),
            repos: Arc::new(GitCliSource::default()),
            tokens: Arc::new(StaticTokenSource::new(git_token)),
        };

        let prompts = PromptSet::load(prompt_dir);
        let worker_count = config.worker_count;
        let service = Arc::new(Service::with_prompts(config, store, providers, prompts));
        let pool = WorkerPool::new(service.queue().clone(), service.clone(), worker_count);

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                let _ = shutdown_tx.send(true);
            }
        });

        tracing::info!(workers = worker_count, "worker pool starting");
        pool.run(shutdown_rx).await?;
        tracing::info!("worker pool stopped");
        Ok(())
    })
}
