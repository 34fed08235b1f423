//! Distributed Game of Life
//!
//! A controller and a compute worker cooperating over two line-JSON RPC links.
//! The worker owns the board and advances it turn by turn on a rayon pool,
//! reporting every turn's flipped cells back; the controller feeds it the
//! initial board, relays user commands, and turns reports into an ordered
//! event stream for an observer.

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod io;
pub mod protocol;
pub mod worker;


pub use config::GolConfig;
pub use controller::{Controller, Event, EventSink, SessionEnd, SessionParams, SessionState, UserCommand};
pub use engine::{Cell, GridEngine, World};
pub use error::{GolError, GolResult};
pub use worker::{SimulationWorker, WorkerService};

/// Initialize tracing for both binaries.
pub fn setup_logging(level: Option<String>) {
    let filter = level.unwrap_or_else(|| "info".to_string());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
