use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use sovereign_operator::config::Config;
use sovereign_operator::intake::IntakeService;
use sovereign_operator::llm::create_provider;
use sovereign_operator::policy::Policy;
use sovereign_operator::queue::JobQueue;
use sovereign_operator::server::{AppState, api_routes};
use sovereign_operator::store::{Ledger, LibSqlLedger};
use sovereign_operator::tools::{CommandRunner, GitCli, ShellRunner};
use sovereign_operator::worker::{LlmPlanner, Planner, StaticPlanner, Worker, WorkerDeps};

#[derive(Parser)]
#[command(name = "sovereign")]
#[command(about = "Policy-gated job pipeline: HTTP intake and a single worker")]
struct Cli {
    /// Capability policy YAML (overrides POLICY_PATH)
    #[arg(long, global = true)]
    policy: Option<PathBuf>,

    /// Run ledger database file (overrides DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Job queue directory (overrides JOBS_DIR)
    #[arg(long, global = true)]
    jobs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP intake API
    Serve {
        /// Listen address (overrides SOVEREIGN_BIND)
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Process queued jobs
    Worker {
        /// Process at most one job, then exit
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(path) = cli.policy {
        config.policy_path = path;
    }
    if let Some(path) = cli.db {
        config.db_path = path;
    }
    if let Some(dir) = cli.jobs_dir {
        config.jobs_dir = dir;
    }

    eprintln!("Sovereign operator v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Policy: {}", config.policy_path.display());
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Jobs: {}", config.jobs_dir.display());

    let policy = Arc::new(
        Policy::load(&config.policy_path)
            .with_context(|| format!("loading policy {}", config.policy_path.display()))?,
    );
    let ledger: Arc<dyn Ledger> = Arc::new(
        LibSqlLedger::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening database {}", config.db_path.display()))?,
    );
    let queue = JobQueue::new(&config.jobs_dir);

    match cli.command {
        Command::Serve { bind } => {
            let addr = bind.unwrap_or(config.bind);
            let intake = IntakeService::new(policy, ledger, queue);
            let app = api_routes(AppState::new(intake));

            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            eprintln!("   API: http://{}/v1/chat", addr);
            info!(addr = %addr, "listening");

            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Shutdown requested");
                })
                .await?;
        }
        Command::Worker { once } => {
            let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner::new());
            let planner: Arc<dyn Planner> = if config.llm_planning {
                Arc::new(LlmPlanner::new(create_provider(config.llm.as_ref())))
            } else {
                Arc::new(StaticPlanner)
            };
            eprintln!("   Probe: {}", config.probe_command);
            eprintln!(
                "   Planner: {}",
                if config.llm_planning { "llm" } else { "static" }
            );

            let worker = Worker::new(WorkerDeps {
                policy,
                ledger,
                queue,
                vcs: Arc::new(GitCli::new(Arc::clone(&runner))),
                runner,
                planner,
                probe_command: config.probe_command,
                poll_interval: config.poll_interval,
            });

            if once {
                let processed = worker.run_once().await?;
                info!(processed, "Single pass finished");
                return Ok(());
            }

            let shutdown = worker.shutdown_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown requested, finishing current job");
                    shutdown.store(true, Ordering::Relaxed);
                }
            });
            worker.run().await;
        }
    }

    Ok(())
}
