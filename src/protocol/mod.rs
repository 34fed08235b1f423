//! Control protocol shared by the controller and the worker.
//!
//! Two service interfaces travel over two separate links:
//! - worker-facing: `Run` (held for the whole simulation), `Count`, `Command`
//! - controller-facing: `ReportTurn`, issued once per completed turn
//!
//! Method names and field shapes below are the wire contract.

pub mod client;
pub mod rpc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GolResult;
pub use crate::engine::{Cell, World};

pub const RUN: &str = "Worker.Run";
pub const COUNT: &str = "Worker.Count";
pub const COMMAND: &str = "Worker.Command";
pub const REPORT_TURN: &str = "Controller.ReportTurn";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRequest {
    pub world: World,
    /// Turn budget
    pub turns: u32,
    pub threads: usize,
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Every turn in the budget was computed
    Completed,
    /// The controller detached; the worker is free for another run
    Reset,
    /// The worker was told to shut down
    Shutdown,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub turn: u32,
    /// Absent after a reset, the board is discarded
    #[serde(default)]
    pub world: Option<World>,
    pub outcome: RunOutcome,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CountRequest {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResponse {
    pub turn: u32,
    pub count: usize,
}

/// Commands the worker accepts while a run is in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerCommand {
    Pause,
    Resume,
    Snapshot,
    SnapshotAndQuit,
    Reset,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: WorkerCommand,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CommandResponse {
    pub turn: u32,
    #[serde(default)]
    pub world: Option<World>,
    #[serde(default)]
    pub paused: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnReport {
    pub turn: u32,
    /// Cells that flipped during this turn
    pub cells: Vec<Cell>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Ack {}

/// Worker-facing interface.
#[async_trait]
pub trait WorkerApi: Send + Sync {
    /// Runs the whole simulation; returns only when the run ends.
    async fn run(&self, request: RunRequest) -> GolResult<RunResponse>;

    async fn count(&self) -> GolResult<CountResponse>;

    async fn command(&self, command: WorkerCommand) -> GolResult<CommandResponse>;
}

/// Controller-facing callback interface.
#[async_trait]
pub trait TurnReporter: Send + Sync {
    async fn report_turn(&self, report: TurnReport) -> GolResult<()>;
}

/// Opens the callback link at the start of every run.
#[async_trait]
pub trait ReporterDialer: Send + Sync {
    async fn dial(&self) -> GolResult<std::sync::Arc<dyn TurnReporter>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_response_fields_are_optional_on_the_wire() {
        let resp: CommandResponse = serde_json::from_value(json!({ "turn": 7 })).unwrap();
        assert_eq!(resp.turn, 7);
        assert!(resp.world.is_none());
        assert!(resp.paused.is_none());
    }

    #[test]
    fn wire_shapes_are_stable() {
        let report = TurnReport {
            turn: 3,
            cells: vec![Cell::new(1, 2)],
        };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({ "turn": 3, "cells": [{ "x": 1, "y": 2 }] })
        );
        assert_eq!(
            serde_json::to_value(CommandRequest { command: WorkerCommand::SnapshotAndQuit }).unwrap(),
            json!({ "command": "SnapshotAndQuit" })
        );
    }
}
