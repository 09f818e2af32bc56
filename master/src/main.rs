mod config;
mod failover;
mod handlers;
mod jobs;
mod journal;
mod restore;
mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use committer::{FileSystem, LocalFileSystem};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::MasterConfig;
use crate::state::AppState;

pub const WORKER_HEARTBEAT_TIMEOUT_SECS: u64 = 20;
pub const FAILOVER_SWEEP_INTERVAL_SECS: u64 = 5;
pub const MAX_TASK_ATTEMPTS: u32 = 3;
pub const MAX_COMMIT_JOB_RETRIES: u32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("master=debug,committer=debug,axum=info")),
        )
        .init();

    let config = MasterConfig::from_env()?;
    info!(
        "master intento {} (state_dir={})",
        config.committer.app_attempt,
        config.state_dir.display()
    );

    let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
    let state = AppState::new(config, fs);

    // retomar lo que quedó en el journal
    let snapshots = journal::load_all(&state.config.state_dir)?;
    let resumed = restore::restore_jobs(&state, snapshots)?;
    if !resumed.is_empty() {
        info!("{} jobs retomados del journal", resumed.len());
    }
    for job_id in &resumed {
        // los que ya tenían todas sus tareas pasan directo al commit
        jobs::finish_job_if_done(&state, job_id).await;
    }

    // router HTTP
    let app = handlers::build_router(state.clone());

    // detección de workers caídos y reintentos de commit en segundo plano
    let failover_state = state.clone();
    tokio::spawn(async move {
        failover::run_failover_loop(failover_state).await;
    });

    let listener = TcpListener::bind(&state.config.bind)
        .await
        .with_context(|| format!("no se pudo escuchar en {}", state.config.bind))?;
    info!("master escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
