use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use chatflow_orchestrator::{SchedulerRunner, SchedulerRunnerConfig};
use chatflow_server::config::{AppConfig, Backend};
use chatflow_server::dispatch::LoggingDispatcher;
use chatflow_server::error::ServerError;
use chatflow_state::Repository;
use chatflow_state_memory::MemoryRepository;
use chatflow_state_postgres::PostgresRepository;

/// Runner binary: periodically dispatches due scheduled tasks.
///
/// Drives only `chatflow_orchestrator::SchedulerRunner`. Streaming a live
/// chat turn through `StreamOrchestrator` needs a concrete `AgentProvider`,
/// which (like `ScheduledTaskDispatcher`) is deliberately left outside this
/// crate's scope, so it isn't wired up here.
#[derive(Parser, Debug)]
#[command(name = "chatflow-server", about = "Scheduled task runner for chatflow")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "chatflow.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    chatflow_server::telemetry::init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    let repository: Arc<dyn Repository> = match config.backend {
        Backend::Memory => {
            info!("using in-memory state backend");
            Arc::new(MemoryRepository::new())
        }
        Backend::Durable => {
            info!(url = %config.database.url, "connecting to postgres repository");
            // No envelope encryptor: this binary never calls save_user_settings, so
            // custom_providers never gets written here. Wire one in before adding
            // a code path that persists UserSettings, or it lands as plaintext.
            let postgres = PostgresRepository::new(config.database.clone().into(), None).await?;
            Arc::new(postgres)
        }
    };

    let (mut runner, shutdown_tx) = SchedulerRunner::with_shutdown_channel(
        Arc::clone(&repository),
        Arc::new(LoggingDispatcher),
        SchedulerRunnerConfig {
            check_interval: config.runner.scheduler_check_interval(),
        },
    );

    let runner_handle = tokio::spawn(async move {
        runner.run().await;
    });

    shutdown_signal().await;
    info!("shutting down scheduler runner");
    drop(shutdown_tx);
    runner_handle.await.ok();

    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then return to trigger shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
