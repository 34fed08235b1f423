//! Controller
//!
//! Drives one session against a worker: loads the initial board, holds the
//! long-lived `Run` call open, and alongside it polls progress and relays user
//! commands. Turn reports arrive through [`TurnReportHandler`] on the callback
//! link and become observer events.

pub mod callback;
pub mod events;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::GolConfig;
use crate::engine::World;
use crate::error::{GolError, GolResult};
use crate::io::{GridInput, GridOutput};
use crate::protocol::{RunOutcome, RunRequest, RunResponse, WorkerApi, WorkerCommand, RUN};

pub use callback::{ControllerService, TurnReportHandler};
pub use events::{Event, EventSink, SessionState};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserCommand {
    Pause,
    Resume,
    Quit,
    Snapshot,
    SnapshotAndQuit,
}

impl UserCommand {
    pub fn from_key(key: char) -> Option<Self> {
        match key {
            'p' => Some(UserCommand::Pause),
            'q' => Some(UserCommand::Quit),
            's' => Some(UserCommand::Snapshot),
            'k' => Some(UserCommand::SnapshotAndQuit),
            _ => None,
        }
    }
}

/// How a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// The whole budget ran and the final board was exported
    Completed { turn: u32 },
    /// The user quit (with or without a snapshot)
    Quit { turn: u32 },
    /// The worker ended the run on its own
    Stopped { turn: u32, outcome: RunOutcome },
}

#[derive(Clone, Debug)]
pub struct SessionParams {
    pub width: usize,
    pub height: usize,
    pub turns: u32,
    pub threads: usize,
    pub poll_interval: Duration,
}

impl SessionParams {
    pub fn from_config(config: &GolConfig) -> Self {
        SessionParams {
            width: config.width,
            height: config.height,
            turns: config.turns,
            threads: config.threads,
            poll_interval: config.poll_interval(),
        }
    }

    fn input_name(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    fn output_name(&self, turn: u32) -> String {
        format!("{}x{}x{}", self.width, self.height, turn)
    }
}

enum Wake {
    Tick,
    Command(Option<UserCommand>),
}

enum FirstDone {
    Run(GolResult<RunResponse>),
    Supervisor(GolResult<u32>),
}

pub struct Controller {
    params: SessionParams,
    worker: Arc<dyn WorkerApi>,
    input: Arc<dyn GridInput>,
    output: Arc<dyn GridOutput>,
    events: EventSink,
    reports: Arc<TurnReportHandler>,
    quitting: AtomicBool,
}

impl Controller {
    pub fn new(
        params: SessionParams,
        worker: Arc<dyn WorkerApi>,
        input: Arc<dyn GridInput>,
        output: Arc<dyn GridOutput>,
        reports: Arc<TurnReportHandler>,
    ) -> Self {
        let events = reports.events().clone();
        Controller {
            params,
            worker,
            input,
            output,
            events,
            reports,
            quitting: AtomicBool::new(false),
        }
    }

    pub async fn run(&self, commands: UnboundedReceiver<UserCommand>) -> GolResult<SessionEnd> {
        let result = self.drive(commands).await;
        if let Err(e) = &result {
            warn!("[Controller] Session failed: {}", e);
            self.events.close();
        }
        result
    }

    async fn drive(&self, mut commands: UnboundedReceiver<UserCommand>) -> GolResult<SessionEnd> {
        let p = &self.params;
        let world = self.input.load(&p.input_name(), p.width, p.height).await?;
        for cell in world.alive_cells() {
            self.events.emit(Event::CellFlipped { turn: 0, cell });
        }

        info!(
            "🚀 [Controller] Starting {}x{} for {} turns on {} threads",
            p.width, p.height, p.turns, p.threads
        );
        let request = RunRequest {
            world,
            turns: p.turns,
            threads: p.threads,
        };

        let run = self.worker.run(request);
        tokio::pin!(run);
        let supervise = self.supervise(&mut commands);
        tokio::pin!(supervise);

        let first = tokio::select! {
            biased;
            response = &mut run => FirstDone::Run(response),
            quit = &mut supervise => FirstDone::Supervisor(quit),
        };

        match first {
            FirstDone::Supervisor(quit) => Ok(SessionEnd::Quit { turn: quit? }),
            FirstDone::Run(response) => {
                let response = response?;
                match response.outcome {
                    RunOutcome::Completed => self.complete(response).await,
                    _ if self.quitting.load(Ordering::Acquire) => {
                        // The worker answered before the quit sequence finished.
                        let turn = supervise.await?;
                        Ok(SessionEnd::Quit { turn })
                    }
                    outcome => {
                        warn!(
                            "[Controller] Worker ended the run at turn {} ({:?})",
                            response.turn, outcome
                        );
                        self.finish(response.turn);
                        Ok(SessionEnd::Stopped {
                            turn: response.turn,
                            outcome,
                        })
                    }
                }
            }
        }
    }

    /// Polls progress and relays commands until the user quits. Returns the
    /// turn the session quit at; never returns while the run is going on.
    async fn supervise(&self, commands: &mut UnboundedReceiver<UserCommand>) -> GolResult<u32> {
        let period = self.params.poll_interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut listening = true;

        loop {
            let wake = tokio::select! {
                _ = ticker.tick() => Wake::Tick,
                command = commands.recv(), if listening => Wake::Command(command),
            };
            match wake {
                Wake::Tick => self.poll_progress().await?,
                Wake::Command(Some(command)) => {
                    if let Some(turn) = self.handle_command(command, commands).await? {
                        return Ok(turn);
                    }
                    ticker.reset();
                }
                Wake::Command(None) => {
                    debug!("[Controller] Command source closed");
                    listening = false;
                }
            }
        }
    }

    async fn poll_progress(&self) -> GolResult<()> {
        if self.reports.last_turn() + 1 >= self.params.turns {
            debug!("[Controller] Skipping poll, run is about to finish");
            return Ok(());
        }
        let progress = self.worker.count().await?;
        info!(
            "[Controller] Turn {}: {} cells alive",
            progress.turn, progress.count
        );
        self.events.emit(Event::AliveCellsCount {
            turn: progress.turn,
            count: progress.count,
        });
        Ok(())
    }

    /// Returns `Some(turn)` when the command ended the session.
    async fn handle_command(
        &self,
        command: UserCommand,
        commands: &mut UnboundedReceiver<UserCommand>,
    ) -> GolResult<Option<u32>> {
        match command {
            UserCommand::Pause => {
                self.pause(commands).await?;
                Ok(None)
            }
            UserCommand::Resume => {
                debug!("[Controller] Resume ignored, not paused");
                Ok(None)
            }
            UserCommand::Snapshot => {
                let snap = self.worker.command(WorkerCommand::Snapshot).await?;
                if let Some(world) = snap.world {
                    self.export(snap.turn, &world).await?;
                }
                Ok(None)
            }
            UserCommand::SnapshotAndQuit => {
                self.quitting.store(true, Ordering::Release);
                let snap = self.worker.command(WorkerCommand::SnapshotAndQuit).await?;
                if let Some(world) = snap.world {
                    self.export(snap.turn, &world).await?;
                    self.output.wait_idle().await?;
                }
                self.finish(snap.turn);
                Ok(Some(snap.turn))
            }
            UserCommand::Quit => {
                self.quitting.store(true, Ordering::Release);
                // No report can follow once the reset is acknowledged, so
                // Quitting stays the last event.
                let turn = self.worker.command(WorkerCommand::Reset).await?.turn;
                self.finish(turn);
                info!("👋 [Controller] Quit at turn {}", turn);
                Ok(Some(turn))
            }
        }
    }

    /// Blocks the supervision loop until the user resumes. Only pause/resume
    /// keys are honoured meanwhile.
    async fn pause(&self, commands: &mut UnboundedReceiver<UserCommand>) -> GolResult<()> {
        let paused = self.worker.command(WorkerCommand::Pause).await?;
        self.events.emit(Event::StateChange {
            turn: paused.turn,
            state: SessionState::Paused,
        });
        info!("⏸️ [Controller] Paused at turn {}", paused.turn);

        loop {
            match commands.recv().await {
                Some(UserCommand::Pause) | Some(UserCommand::Resume) => break,
                Some(other) => debug!("[Controller] {:?} ignored while paused", other),
                None => {
                    warn!("[Controller] Command source closed while paused, resuming");
                    break;
                }
            }
        }

        let resumed = self.worker.command(WorkerCommand::Resume).await?;
        self.events.emit(Event::StateChange {
            turn: resumed.turn,
            state: SessionState::Executing,
        });
        info!("▶️ [Controller] Resumed at turn {}", resumed.turn);
        Ok(())
    }

    async fn export(&self, turn: u32, world: &World) -> GolResult<()> {
        let filename = self.params.output_name(turn);
        self.output.export(&filename, world).await?;
        self.events.emit(Event::ImageOutputComplete { turn, filename });
        Ok(())
    }

    async fn complete(&self, response: RunResponse) -> GolResult<SessionEnd> {
        let turn = response.turn;
        let world = response
            .world
            .ok_or_else(|| GolError::call(RUN, "completed run returned no world"))?;

        self.events.emit(Event::FinalTurnComplete {
            turn,
            alive: world.alive_cells(),
        });
        self.export(turn, &world).await?;
        self.output.wait_idle().await?;
        self.finish(turn);
        info!("🏁 [Controller] Completed {} turns", turn);
        Ok(SessionEnd::Completed { turn })
    }

    fn finish(&self, turn: u32) {
        self.events.emit(Event::StateChange {
            turn,
            state: SessionState::Quitting,
        });
        self.events.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_map_to_commands() {
        assert_eq!(UserCommand::from_key('p'), Some(UserCommand::Pause));
        assert_eq!(UserCommand::from_key('q'), Some(UserCommand::Quit));
        assert_eq!(UserCommand::from_key('s'), Some(UserCommand::Snapshot));
        assert_eq!(UserCommand::from_key('k'), Some(UserCommand::SnapshotAndQuit));
        assert_eq!(UserCommand::from_key('x'), None);
    }

    #[test]
    fn session_names_follow_board_size_and_turn() {
        let params = SessionParams::from_config(&GolConfig {
            width: 64,
            height: 32,
            ..GolConfig::default()
        });
        assert_eq!(params.input_name(), "64x32");
        assert_eq!(params.output_name(100), "64x32x100");
        assert_eq!(params.poll_interval, Duration::from_secs(2));
    }
}
