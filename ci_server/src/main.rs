//! CI Dashboard Server.
//!
//! Listens for GitHub push webhooks, dispatches builds for the plans bound to
//! the pushed repository, reports build states back as commit statuses and
//! serves build history as a JSON API.

mod config;
mod metrics;
mod migration;
mod models;
mod routes;
mod schema;
mod seeder;
mod services;
mod store;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::config::CiConfig;
use crate::services::executor;
use crate::services::status_reporter::StatusReporter;
use crate::services::status_worker::{run_status_worker, StatusQueue};
use crate::store::{MemoryStore, PgStore, Store};

#[derive(Parser)]
#[command(name = "ci-dashboard", about = "CI dashboard server")]
struct Cli {
    /// Server port
    #[arg(short, long, env = "CI_PORT", default_value = "9090")]
    port: u16,

    /// PostgreSQL connection URL. Without it builds are kept in memory.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum database connections
    #[arg(long, env = "CI_DB_MAX_CONNECTIONS", default_value = "10")]
    db_max_connections: usize,

    /// JSON file of repositories and plans to load at start-up
    #[arg(long, env = "CI_SEED_FILE")]
    seed: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the webhook and API (default)
    Serve,
    /// Run a queued build's test command and record its outcome
    Run {
        /// Build to execute
        build_id: i64,

        /// Shell command, run with `bash -c`
        #[arg(long)]
        script: String,

        /// Checkout to run the command in
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();
    let ci_config = CiConfig::from_env();

    tracing::info!("Starting CI dashboard...");

    let store: Arc<dyn Store> = match &cli.database_url {
        Some(url) => {
            let pg = PgStore::connect(url, cli.db_max_connections)?;
            tracing::info!("Running database migration...");
            pg.migrate().await?;
            tracing::info!("Database migration completed.");
            Arc::new(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL not set -- using in-memory store, data is lost on exit");
            Arc::new(MemoryStore::new())
        }
    };

    if let Some(path) = &cli.seed {
        let summary = seeder::seed_from_file(store.as_ref(), path).await?;
        tracing::info!(
            repositories = summary.repositories_created,
            plans = summary.plans_created,
            links = summary.links,
            "Seed file loaded"
        );
    }

    let (status_queue, status_worker) = start_status_worker(&ci_config, store.clone());

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cli.port, store, ci_config, status_queue).await?,
        Command::Run {
            build_id,
            script,
            dir,
        } => {
            let build =
                executor::execute_build(store.as_ref(), &status_queue, build_id, &script, &dir)
                    .await?;
            tracing::info!(build_id, status = %build.status, "Build finished");
            // Let the worker deliver the queued statuses before exiting.
            drop(status_queue);
            if let Some(worker) = status_worker {
                worker.await?;
            }
        }
    }

    Ok(())
}

/// Spawn the commit status worker. Reporting is disabled without a GitHub token.
fn start_status_worker(
    config: &CiConfig,
    store: Arc<dyn Store>,
) -> (StatusQueue, Option<JoinHandle<()>>) {
    if config.github_token.is_empty() {
        return (StatusQueue::disabled(), None);
    }
    let (queue, rx) = StatusQueue::channel(config.status_queue_size);
    let reporter = StatusReporter::github(config);
    let worker = tokio::spawn(run_status_worker(rx, store, reporter));
    (queue, Some(worker))
}

async fn serve(
    port: u16,
    store: Arc<dyn Store>,
    config: CiConfig,
    status_queue: StatusQueue,
) -> anyhow::Result<()> {
    let ci_state = routes::CiRouterState::new(store, config, status_queue);
    let app = Router::new()
        .nest("/ci", routes::ci_router(ci_state))
        .layer(TraceLayer::new_for_http());

    // Initialize metrics
    metrics::init_metrics();

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("CI dashboard listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
