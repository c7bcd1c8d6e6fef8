use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleetscope::config::Config;

mod commands;

use commands::runtime::ResumeParams;
use commands::{CrawlParams, MasterParams, WorkerParams};

#[derive(Parser)]
#[command(
    name = "fleetscope",
    version,
    about = "Scope-enforcing distributed crawl frontier with checkpoint/resume",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, default_value = "fleetscope.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl in a single process: coordinator plus local workers
    Crawl {
        /// Number of local workers
        #[arg(short, long, default_value = "2")]
        workers: usize,

        /// Seed URL (repeatable); added to the configured seeds
        #[arg(short, long = "seed")]
        seeds: Vec<String>,

        /// Override the configured maximum depth
        #[arg(long)]
        max_depth: Option<u32>,

        /// Job identifier
        #[arg(long)]
        job_id: Option<String>,
    },

    /// Run the HTTP coordinator for remote workers
    Master {
        /// Bind address, overrides the config file
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// Resume a job ID or checkpoint name instead of starting fresh
        #[arg(long)]
        resume: Option<String>,

        /// With --resume: use the scope from the config file
        #[arg(long)]
        scope_from_config: bool,

        /// With --resume: accept a scope that differs from the checkpoint's
        #[arg(long)]
        allow_scope_change: bool,
    },

    /// Run a remote worker
    Worker {
        /// Coordinator URL, overrides the config file
        #[arg(long)]
        coordinator: Option<String>,

        /// Worker identifier
        #[arg(long)]
        id: Option<String>,
    },

    /// Resume a job from its latest valid checkpoint or a named checkpoint
    Resume {
        /// Job ID or checkpoint name
        target: String,

        /// Number of local workers
        #[arg(short, long, default_value = "2")]
        workers: usize,

        /// Use the scope from the config file instead of the checkpoint's
        #[arg(long)]
        scope_from_config: bool,

        /// Accept a scope that differs from the checkpoint's
        #[arg(long)]
        allow_scope_change: bool,
    },

    /// Explain scope decisions for URLs
    ScopeTest {
        /// URLs to evaluate
        #[arg(required = true)]
        urls: Vec<String>,

        /// Extra seed URL (repeatable) for seed-derived scopes
        #[arg(short, long = "seed")]
        seeds: Vec<String>,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// List checkpoints of a job
    Checkpoints {
        /// Job ID
        job: String,

        /// Remove checkpoints beyond `checkpoint.keep_last` first
        #[arg(long)]
        gc: bool,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;
    config.apply_env()?;
    if let Some(format) = &cli.log_format {
        config.logging.format = format.clone();
    }

    setup_tracing(&config.logging.level, &config.logging.format, cli.verbose)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "fleetscope starting");

    match cli.command {
        Commands::Crawl {
            workers,
            seeds,
            max_depth,
            job_id,
        } => {
            config.job.seeds.extend(seeds);
            if let Some(depth) = max_depth {
                config.job.max_depth = depth;
            }
            if job_id.is_some() {
                config.job.id = job_id;
            }
            tracing::info!(
                workers = %workers,
                seeds = config.job.seeds.len(),
                max_depth = config.job.max_depth,
                "Starting crawl command"
            );
            commands::crawl(config, CrawlParams { workers }).await?;
        }

        Commands::Master {
            bind,
            resume,
            scope_from_config,
            allow_scope_change,
        } => {
            tracing::info!(bind = ?bind, resume = ?resume, "Starting master command");
            let resume = resume.map(|target| ResumeParams {
                target,
                scope_from_config,
                allow_scope_change,
            });
            commands::master(config, MasterParams { resume, bind }).await?;
        }

        Commands::Worker { coordinator, id } => {
            tracing::info!(coordinator = ?coordinator, id = ?id, "Starting worker command");
            commands::worker(
                config,
                WorkerParams {
                    id,
                    coordinator_url: coordinator,
                },
            )
            .await?;
        }

        Commands::Resume {
            target,
            workers,
            scope_from_config,
            allow_scope_change,
        } => {
            tracing::info!(target = %target, workers = %workers, "Starting resume command");
            commands::resume(
                config,
                ResumeParams {
                    target,
                    scope_from_config,
                    allow_scope_change,
                },
                CrawlParams { workers },
            )
            .await?;
        }

        Commands::ScopeTest { urls, seeds, json } => {
            commands::scope_test(config, urls, seeds, json).await?;
        }

        Commands::Checkpoints { job, gc, json } => {
            commands::checkpoints(config, job, gc, json).await?;
        }
    }

    Ok(())
}

/// A missing default config file means defaults; an explicit path must exist
fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::from_file(path)
    } else if path.as_os_str() == "fleetscope.toml" {
        Ok(Config::default())
    } else {
        anyhow::bail!("Config file not found: {}", path.display())
    }
}

fn setup_tracing(level: &str, format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("fleetscope=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("fleetscope={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
