//! pagebuild scheduler server

use pagebuild_api::{AppState, routes};
use pagebuild_cloud::{CloudFoundryClient, HttpStatusReporter};
use pagebuild_config::{Config, PoolKind};
use pagebuild_core::compute::ComputeApi;
use pagebuild_core::{BuilderPool, StatusReporter};
use pagebuild_pool::{ContainerPool, TaskPool};
use pagebuild_scheduler::{Scheduler, connect_sources};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load()?;

    let compute: Arc<dyn ComputeApi> = Arc::new(CloudFoundryClient::from_config(&config.cloud)?);
    let reporter: Arc<dyn StatusReporter> = Arc::new(HttpStatusReporter::default());

    let pool: Arc<dyn BuilderPool> = match config.pool.kind {
        PoolKind::Container => Arc::new(ContainerPool::new(
            compute.clone(),
            reporter,
            config.pool.container_settings(),
        )),
        PoolKind::Task => Arc::new(TaskPool::new(
            compute.clone(),
            reporter,
            config.pool.task_settings(),
        )),
    };
    info!(pool = pool.name(), "Using builder pool");

    info!("Connecting to queues...");
    let sources = connect_sources(&config.queue).await?;
    info!(count = sources.len(), "Queues connected");

    let scheduler = Scheduler::new(pool.clone(), sources.clone(), &config.server.callback_host);
    let scheduler_task = scheduler.start().await?;

    let state = AppState::new(pool, sources, compute);
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Starting server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    scheduler_task.await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
