//! convoy-server – entry point.
//!
//! Startup order for `serve`:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Open the SQLite database and run pending migrations.
//! 4. Build the queue and start the worker pool.
//! 5. Build the Axum router and start the HTTP server with graceful shutdown.
//! 6. Stop the workers and wait for in-flight tasks.

mod cli;
mod config;
mod error;
mod middleware;
mod platform;
mod routes;
mod schemas;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use convoy_core::migrator::{DestinationClient, Orchestrator};
use convoy_core::queue::{AnyQueue, MemoryQueue, SqliteQueue};
use convoy_core::{SqliteStore, WorkerPool, WorkerPoolHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::{Cli, Command};
use crate::config::{Config, QueueKind};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    init_tracing(&cfg);
    info!(version = env!("CARGO_PKG_VERSION"), "convoy-server starting");

    match cli.command.unwrap_or_default() {
        Command::Serve => serve(cfg).await,
        Command::Migrate(args) => migrate_once(cfg, args).await,
        Command::CompleteMigration(args) => complete_migration(cfg, args).await,
    }
}

fn init_tracing(cfg: &Config) {
    // RUST_LOG wins; an invalid CONVOY_LOG falls back to `info` loudly.
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: CONVOY_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn serve(cfg: Config) -> anyhow::Result<()> {
    // ── 3. Database ────────────────────────────────────────────────────────────
    let store = Arc::new(
        SqliteStore::connect(&cfg.database_url)
            .await
            .with_context(|| format!("opening {}", cfg.database_url))?,
    );
    info!(database_url = %cfg.database_url, "database ready");

    // ── 4. Queue and workers ───────────────────────────────────────────────────
    let queue = Arc::new(match cfg.queue {
        QueueKind::Sqlite => AnyQueue::Sqlite(
            SqliteQueue::from_store(&store)
                .with_lease(cfg.queue_lease)
                .with_poll_interval(cfg.queue_poll_interval),
        ),
        QueueKind::Memory => {
            warn!("in-memory queue selected; queued tasks are lost on restart");
            AnyQueue::Memory(MemoryQueue::new())
        }
    });

    let shutdown = CancellationToken::new();
    let migrator = platform::migrator(&cfg, Arc::clone(&store), shutdown.child_token());
    let workers = WorkerPool::new(Arc::clone(&store), Arc::clone(&queue), migrator, cfg.workers)
        .start(shutdown.clone());
    info!(workers = cfg.workers, queue = ?cfg.queue, "worker pool started");

    // ── 5. HTTP server with graceful shutdown ──────────────────────────────────
    let state = Arc::new(AppState {
        config: Arc::new(cfg.clone()),
        store,
        queue,
    });
    let app = routes::build(state);
    let addr: SocketAddr = cfg
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address '{}'", cfg.bind_address))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    let http_shutdown = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            http_shutdown.cancel();
        })
        .await;

    // ── 6. Drain workers ───────────────────────────────────────────────────────
    drain_workers(served, workers).await?;
    info!("convoy-server stopped");
    Ok(())
}

/// Stops the workers after the HTTP server returned, successfully or not,
/// and waits for in-flight tasks before handing back the server's result.
async fn drain_workers<E: std::fmt::Display>(
    served: Result<(), E>,
    workers: WorkerPoolHandle,
) -> Result<(), E> {
    if let Err(e) = &served {
        error!(error = %e, "HTTP server failed; stopping workers");
    }
    info!("waiting for in-flight tasks");
    workers.shutdown().await;
    served
}

/// Runs one conversation through the orchestrator without touching the queue.
async fn migrate_once(cfg: Config, args: cli::MigrateArgs) -> anyhow::Result<()> {
    let store = Arc::new(SqliteStore::connect(&cfg.database_url).await?);
    let cancel = CancellationToken::new();
    let zoom = platform::zoom_client(&cfg)?;
    let teams = platform::teams_client(&cfg, cancel.clone())?;
    let orchestrator = Orchestrator::new(Arc::new(zoom), Arc::new(teams), store);

    let request = args.into_request();
    info!(conversation_id = %request.conversation_id, team = %request.team_name, "migrating");

    let report = tokio::select! {
        report = orchestrator.run(&request) => report?,
        _ = shutdown_signal() => {
            cancel.cancel();
            anyhow::bail!("interrupted");
        }
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn complete_migration(cfg: Config, args: cli::CompleteArgs) -> anyhow::Result<()> {
    let teams = platform::teams_client(&cfg, CancellationToken::new())?;
    if let Some(channel_id) = &args.channel_id {
        teams
            .complete_migration_channel(&args.team_id, channel_id)
            .await
            .context("completing channel migration")?;
        info!(team_id = %args.team_id, %channel_id, "channel left migration mode");
    }
    teams
        .complete_migration(&args.team_id)
        .await
        .context("completing team migration")?;
    info!(team_id = %args.team_id, "team left migration mode");
    Ok(())
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use convoy_core::migrator::{MigrationError, MigrationReport, Migrator};
    use convoy_core::queue::TaskQueue;
    use convoy_core::{Task, TaskPayload, TaskStatus, TaskStore};
    use tokio::sync::Notify;

    use super::*;

    /// Reports that it started, then finishes after a short delay.
    struct SlowMigrator {
        started: Arc<Notify>,
    }

    #[async_trait]
    impl Migrator for SlowMigrator {
        async fn migrate(&self, _task: &Task) -> Result<MigrationReport, MigrationError> {
            self.started.notify_one();
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(MigrationReport::default())
        }
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn server_error_still_drains_in_flight_tasks() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let queue = Arc::new(MemoryQueue::new());
        let started = Arc::new(Notify::new());
        let migrator = Arc::new(SlowMigrator {
            started: started.clone(),
        });
        let id = store
            .create_task(Task::new("zoom", "teams", TaskPayload::new()))
            .await
            .unwrap();
        queue.publish(&id).await.unwrap();

        let workers =
            WorkerPool::new(Arc::clone(&store), queue, migrator, 1).start(CancellationToken::new());
        started.notified().await;

        let served: Result<(), std::io::Error> = Err(std::io::Error::other("listener closed"));
        let result = drain_workers(served, workers).await;

        assert!(result.is_err());
        assert_eq!(store.get_task(&id).await.unwrap().status, TaskStatus::Success);
        assert!(logs_contain("HTTP server failed"));
    }
}
