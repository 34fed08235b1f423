//! Simulation Worker
//!
//! Owns the live board for one run at a time. `start` holds the caller for the
//! whole simulation while `count` and `command` stay answerable: all three
//! meet on one lock, and the turn loop only holds it for the
//! compute-and-report section of a turn.
//!
//! States: Idle -> Running <-> Paused -> Idle (completed, reset or shutdown).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::engine::GridEngine;
use crate::error::{GolError, GolResult};
use crate::protocol::rpc::{dispatch, Handler};
use crate::protocol::{
    CommandRequest, CommandResponse, CountRequest, CountResponse, ReporterDialer, RunOutcome,
    RunRequest, RunResponse, TurnReport, TurnReporter, WorkerApi, WorkerCommand, COMMAND, COUNT,
    RUN,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Paused,
}

/// Sent from command handlers to the turn loop.
#[derive(Clone, Copy, Debug)]
enum Signal {
    Pause,
    Resume,
    Stop(RunOutcome),
}

struct WorkerState {
    engine: Option<GridEngine>,
    turn: u32,
    run_state: RunState,
    signals: Option<UnboundedSender<Signal>>,
}

impl WorkerState {
    fn idle() -> Self {
        WorkerState {
            engine: None,
            turn: 0,
            run_state: RunState::Idle,
            signals: None,
        }
    }

    fn signal(&self, signal: Signal) {
        if let Some(tx) = &self.signals {
            let _ = tx.send(signal);
        }
    }

    fn clear(&mut self) {
        *self = WorkerState::idle();
    }
}

pub struct SimulationWorker {
    state: Arc<Mutex<WorkerState>>,
    dialer: Arc<dyn ReporterDialer>,
    shutdown: Arc<watch::Sender<bool>>,
}

/// Held by `start`; if the caller goes away mid-run the loop is reset.
struct CallerGuard(UnboundedSender<Signal>);

impl Drop for CallerGuard {
    fn drop(&mut self) {
        let _ = self.0.send(Signal::Stop(RunOutcome::Reset));
    }
}

impl SimulationWorker {
    pub fn new(dialer: Arc<dyn ReporterDialer>) -> Self {
        let (shutdown, _) = watch::channel(false);
        SimulationWorker {
            state: Arc::new(Mutex::new(WorkerState::idle())),
            dialer,
            shutdown: Arc::new(shutdown),
        }
    }

    /// Flips to `true` once the worker has been told to shut down.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Ends any run in flight with `Shutdown` and stops the server.
    pub async fn shutdown(&self) {
        let state = self.state.lock().await;
        state.signal(Signal::Stop(RunOutcome::Shutdown));
        self.shutdown.send_replace(true);
        warn!("🛑 [Worker] Shutdown requested at turn {}", state.turn);
    }

    pub async fn run_state(&self) -> RunState {
        self.state.lock().await.run_state
    }

    /// Run a whole simulation. Returns when the budget is spent, or earlier on
    /// reset or shutdown.
    ///
    /// The run itself lives in its own task; dropping this future resets it
    /// rather than leaving the worker busy.
    pub async fn start(&self, request: RunRequest) -> GolResult<RunResponse> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock().await;
            if state.run_state != RunState::Idle {
                return Err(GolError::Busy);
            }
            state.engine = Some(GridEngine::new(&request.world, request.threads)?);
            state.turn = 0;
            state.run_state = RunState::Running;
            state.signals = Some(tx.clone());
        }
        let _caller = CallerGuard(tx);

        info!(
            "🚀 [Worker] Run started: {}x{}, {} turns, {} threads",
            request.world.width, request.world.height, request.turns, request.threads
        );

        let run = tokio::spawn(drive_run(
            self.state.clone(),
            self.dialer.clone(),
            self.shutdown.clone(),
            rx,
            request.turns,
        ));
        match run.await {
            Ok(result) => result,
            Err(e) => {
                error!("[Worker] Run task died: {}", e);
                self.state.lock().await.clear();
                self.shutdown.send_replace(true);
                Err(GolError::Engine(format!("run task died: {}", e)))
            }
        }
    }

    /// Live cells and turn, read together.
    pub async fn count(&self) -> CountResponse {
        let state = self.state.lock().await;
        CountResponse {
            turn: state.turn,
            count: state.engine.as_ref().map_or(0, GridEngine::alive_count),
        }
    }

    pub async fn command(&self, command: WorkerCommand) -> CommandResponse {
        let mut state = self.state.lock().await;
        let turn = state.turn;
        match command {
            WorkerCommand::Pause => {
                if state.run_state == RunState::Running {
                    state.run_state = RunState::Paused;
                    state.signal(Signal::Pause);
                    info!("⏸️ [Worker] Pause requested at turn {}", turn);
                }
                CommandResponse {
                    turn,
                    world: None,
                    paused: Some(state.run_state == RunState::Paused),
                }
            }
            WorkerCommand::Resume => {
                if state.run_state == RunState::Paused {
                    state.run_state = RunState::Running;
                    state.signal(Signal::Resume);
                    info!("▶️ [Worker] Resume requested at turn {}", turn);
                }
                CommandResponse {
                    turn,
                    world: None,
                    paused: Some(state.run_state == RunState::Paused),
                }
            }
            WorkerCommand::Snapshot => CommandResponse {
                turn,
                world: state.engine.as_ref().map(GridEngine::snapshot),
                paused: None,
            },
            WorkerCommand::SnapshotAndQuit => {
                let world = state.engine.as_ref().map(GridEngine::snapshot);
                state.signal(Signal::Stop(RunOutcome::Shutdown));
                self.shutdown.send_replace(true);
                warn!("🛑 [Worker] Shutdown requested at turn {}", turn);
                CommandResponse {
                    turn,
                    world,
                    paused: None,
                }
            }
            WorkerCommand::Reset => {
                state.signal(Signal::Stop(RunOutcome::Reset));
                info!("[Worker] Reset requested at turn {}", turn);
                CommandResponse {
                    turn,
                    world: None,
                    paused: None,
                }
            }
        }
    }
}

/// Dials the controller and runs the turn loop to its end. Failures are
/// cleaned up here so they are handled even when nobody awaits the run.
async fn drive_run(
    shared: Arc<Mutex<WorkerState>>,
    dialer: Arc<dyn ReporterDialer>,
    shutdown: Arc<watch::Sender<bool>>,
    signals: UnboundedReceiver<Signal>,
    budget: u32,
) -> GolResult<RunResponse> {
    let reporter = match dialer.dial().await {
        Ok(reporter) => reporter,
        Err(e) => {
            shared.lock().await.clear();
            return Err(e);
        }
    };

    let loop_state = shared.clone();
    let runtime = Handle::current();
    let joined = tokio::task::spawn_blocking(move || {
        turn_loop(loop_state, signals, reporter, runtime, budget)
    })
    .await;
    let result = match joined {
        Ok(result) => result,
        Err(e) => Err(GolError::Engine(format!("turn loop died: {}", e))),
    };

    match &result {
        Ok(response) => info!(
            "🏁 [Worker] Run ended at turn {} ({:?})",
            response.turn, response.outcome
        ),
        Err(e) => {
            error!("[Worker] Run aborted: {}", e);
            shared.lock().await.clear();
            shutdown.send_replace(true);
        }
    }
    result
}

/// Body of the dedicated turn-loop thread.
///
/// Signals are read with the state lock held, so any command that returned
/// before a turn began is honoured before that turn is computed.
fn turn_loop(
    shared: Arc<Mutex<WorkerState>>,
    mut signals: UnboundedReceiver<Signal>,
    reporter: Arc<dyn TurnReporter>,
    runtime: Handle,
    budget: u32,
) -> GolResult<RunResponse> {
    let mut turn = 0;
    while turn < budget {
        let mut state = shared.blocking_lock();
        match signals.try_recv() {
            Ok(Signal::Pause) => {
                drop(state);
                info!("[Worker] Paused after turn {}", turn);
                match wait_for_resume(&mut signals) {
                    None => {
                        info!("[Worker] Resumed after turn {}", turn);
                        continue;
                    }
                    Some(outcome) => return Ok(finish(&shared, outcome, turn)),
                }
            }
            Ok(Signal::Resume) => continue,
            Ok(Signal::Stop(outcome)) => {
                drop(state);
                return Ok(finish(&shared, outcome, turn));
            }
            Err(TryRecvError::Disconnected) => {
                drop(state);
                return Ok(finish(&shared, RunOutcome::Reset, turn));
            }
            Err(TryRecvError::Empty) => {}
        }

        let engine = state
            .engine
            .as_mut()
            .ok_or_else(|| GolError::Engine("board discarded mid-run".to_string()))?;
        engine.step();
        let cells = engine.delta();
        turn += 1;
        state.turn = turn;

        debug!("[Worker] Turn {} computed, {} cells flipped", turn, cells.len());
        runtime.block_on(reporter.report_turn(TurnReport { turn, cells }))?;
    }

    Ok(finish(&shared, RunOutcome::Completed, turn))
}

/// Blocks until resumed (`None`) or stopped.
fn wait_for_resume(signals: &mut UnboundedReceiver<Signal>) -> Option<RunOutcome> {
    loop {
        match signals.blocking_recv() {
            Some(Signal::Resume) => return None,
            Some(Signal::Pause) => continue,
            Some(Signal::Stop(outcome)) => return Some(outcome),
            None => return Some(RunOutcome::Reset),
        }
    }
}

fn finish(shared: &Mutex<WorkerState>, outcome: RunOutcome, turn: u32) -> RunResponse {
    let mut state = shared.blocking_lock();
    let world = match outcome {
        RunOutcome::Reset => None,
        RunOutcome::Completed | RunOutcome::Shutdown => state.engine.as_ref().map(GridEngine::snapshot),
    };
    state.clear();
    RunResponse {
        turn,
        world,
        outcome,
    }
}

#[async_trait]
impl WorkerApi for SimulationWorker {
    async fn run(&self, request: RunRequest) -> GolResult<RunResponse> {
        self.start(request).await
    }

    async fn count(&self) -> GolResult<CountResponse> {
        Ok(SimulationWorker::count(self).await)
    }

    async fn command(&self, command: WorkerCommand) -> GolResult<CommandResponse> {
        Ok(SimulationWorker::command(self, command).await)
    }
}

/// Serves `Worker.*` calls over the RPC transport.
pub struct WorkerService {
    worker: Arc<SimulationWorker>,
}

impl WorkerService {
    pub fn new(worker: Arc<SimulationWorker>) -> Self {
        WorkerService { worker }
    }
}

#[async_trait]
impl Handler for WorkerService {
    async fn handle(&self, method: &str, params: Value) -> GolResult<Value> {
        let worker = &self.worker;
        match method {
            RUN => dispatch(params, |req: RunRequest| worker.start(req)).await,
            COUNT => dispatch(params, |_: CountRequest| async move { Ok(worker.count().await) }).await,
            COMMAND => {
                dispatch(params, |req: CommandRequest| async move {
                    Ok(worker.command(req.command).await)
                })
                .await
            }
            other => Err(GolError::UnknownMethod(other.to_string())),
        }
    }
}
