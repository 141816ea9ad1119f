mod config;
mod log_cmd;
mod reconcile_cmd;
mod run_cmd;
mod status_cmd;

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use config::SpoolConfig;
use run_cmd::RunOptions;

#[derive(Parser)]
#[command(
    name = "spool",
    version,
    about = "Crash-resilient runner for streaming LLM coding agents"
)]
struct Cli {
    /// Jobs directory (overrides SPOOL_JOBS_DIR env var and config file)
    #[arg(long, global = true)]
    jobs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a spool config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Run one agent job in the foreground
    Run {
        /// Harness to run: claude, codex, or gemini
        #[arg(long, default_value = "claude")]
        harness: String,
        /// Job ID (defaults to a fresh UUID)
        #[arg(long)]
        job_id: Option<String>,
        /// Model override passed to the agent
        #[arg(long)]
        model: Option<String>,
        /// Session ID to resume (claude only)
        #[arg(long)]
        resume: Option<String>,
        /// Working directory for the agent
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Extra environment variable, KEY=VALUE (repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
        /// Kill the job after this many seconds without output
        #[arg(long)]
        idle_timeout: Option<u64>,
        /// Kill the job after this many seconds in total
        #[arg(long)]
        timeout: Option<u64>,
        /// Prompt passed to the agent
        prompt: String,
    },
    /// Show job status (omit job_id to list all jobs)
    Status {
        /// Job ID to show status for
        job_id: Option<String>,
    },
    /// Show the event log for a job
    Log {
        /// Job ID to show events for
        job_id: String,
    },
    /// Settle jobs left running by a coordinator that exited
    Reconcile,
    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

/// Execute the `spool init` command: write config file.
fn cmd_init(jobs_dir: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let jobs_dir = jobs_dir.unwrap_or_else(config::default_jobs_dir);
    let cfg = config::ConfigFile {
        jobs_dir: Some(jobs_dir.clone()),
        ..config::ConfigFile::default()
    };
    config::save_config_to(&cfg, &path)?;

    println!("Config written to {}", path.display());
    println!("  jobs_dir = {}", jobs_dir.display());
    println!();
    println!("Add [timeouts] and [binaries] sections to customize.");

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            cmd_init(cli.jobs_dir, force)?;
        }
        Commands::Run {
            harness,
            job_id,
            model,
            resume,
            cwd,
            env,
            idle_timeout,
            timeout,
            prompt,
        } => {
            let resolved = SpoolConfig::resolve(cli.jobs_dir.as_deref())?;
            let options = RunOptions {
                harness,
                job_id,
                model,
                resume,
                cwd,
                env,
                idle_timeout,
                timeout,
                prompt,
            };
            let completed = run_cmd::run_job(resolved.executor, options).await?;
            if !completed {
                std::process::exit(1);
            }
        }
        Commands::Status { job_id } => {
            let resolved = SpoolConfig::resolve(cli.jobs_dir.as_deref())?;
            status_cmd::run_status(&resolved.executor.jobs_dir, job_id.as_deref())?;
        }
        Commands::Log { job_id } => {
            let resolved = SpoolConfig::resolve(cli.jobs_dir.as_deref())?;
            log_cmd::run_log(&resolved.executor.jobs_dir, &job_id)?;
        }
        Commands::Reconcile => {
            let resolved = SpoolConfig::resolve(cli.jobs_dir.as_deref())?;
            reconcile_cmd::run_reconcile(resolved.executor).await?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "spool", &mut std::io::stdout());
        }
    }

    Ok(())
}
