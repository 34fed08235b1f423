//! Controller: loads the board, drives one session against the worker and
//! logs observer events. Keys on stdin: p (pause/resume), s (snapshot),
//! q (quit), k (snapshot and stop the worker).

use std::io::BufRead;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use gol_distributed::controller::{ControllerService, TurnReportHandler};
use gol_distributed::io::PgmStore;
use gol_distributed::protocol::client::WorkerClient;
use gol_distributed::protocol::rpc::RpcServer;
use gol_distributed::{
    setup_logging, Controller, Event, EventSink, GolConfig, SessionParams, UserCommand,
};

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging(std::env::var("RUST_LOG").ok());
    let config = GolConfig::from_env()?;
    let params = SessionParams::from_config(&config);

    let (sink, mut events) = EventSink::channel();
    let reports = Arc::new(TurnReportHandler::new(params.turns, sink));

    let callback = RpcServer::bind(&config.controller_addr, "Controller").await?;
    let (stop_callback, stop_rx) = watch::channel(false);
    let callback_task = tokio::spawn(
        callback.serve(Arc::new(ControllerService::new(reports.clone())), stop_rx),
    );

    let worker = Arc::new(WorkerClient::dial(&config.worker_addr).await?);
    let store = Arc::new(PgmStore::new(&config.images_dir, &config.out_dir));
    let controller = Controller::new(params, worker, store.clone(), store, reports);

    let (keys, commands) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("gol-keys".to_string())
        .spawn(move || read_keys(keys))?;

    let observer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                Event::CellFlipped { .. } | Event::TurnComplete { .. } => {
                    debug!("[Observer] {}", event)
                }
                _ => info!("[Observer] {}", event),
            }
        }
    });

    let end = controller.run(commands).await?;
    observer.await?;
    info!("🏁 [Controller] Session ended: {:?}", end);

    // Closing the worker link lets both servers drain.
    drop(controller);
    stop_callback.send_replace(true);
    callback_task.await??;
    Ok(())
}

/// Blocking stdin reader on its own thread; ends at EOF or once the session
/// stops listening.
fn read_keys(keys: UnboundedSender<UserCommand>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        for key in line.trim().chars() {
            match UserCommand::from_key(key) {
                Some(command) => {
                    if keys.send(command).is_err() {
                        return;
                    }
                }
                None => warn!("[Controller] Unknown key {:?}", key),
            }
        }
    }
}
