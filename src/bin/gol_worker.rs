//! Compute worker: serves `Worker.*` until told to shut down.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use gol_distributed::protocol::client::TcpReporterDialer;
use gol_distributed::protocol::rpc::RpcServer;
use gol_distributed::{setup_logging, GolConfig, SimulationWorker, WorkerService};

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging(std::env::var("RUST_LOG").ok());
    let config = GolConfig::from_env()?;

    let dialer = TcpReporterDialer::new(config.controller_addr.clone());
    let worker = Arc::new(SimulationWorker::new(Arc::new(dialer)));
    let server = RpcServer::bind(&config.worker_addr, "Worker").await?;
    info!(
        "⚙️ [Worker] Reporting turns to {}",
        config.controller_addr
    );

    let on_interrupt = worker.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("[Worker] Interrupted");
            on_interrupt.shutdown().await;
        }
    });

    let shutdown = worker.shutdown_signal();
    server
        .serve(Arc::new(WorkerService::new(worker)), shutdown)
        .await?;
    info!("👋 [Worker] Shut down");
    Ok(())
}
