//! Observer-facing event stream.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::warn;

use crate::engine::Cell;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Executing,
    Paused,
    Quitting,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CellFlipped { turn: u32, cell: Cell },
    TurnComplete { turn: u32 },
    AliveCellsCount { turn: u32, count: usize },
    StateChange { turn: u32, state: SessionState },
    ImageOutputComplete { turn: u32, filename: String },
    FinalTurnComplete { turn: u32, alive: Vec<Cell> },
}

impl Event {
    pub fn turn(&self) -> u32 {
        match self {
            Event::CellFlipped { turn, .. }
            | Event::TurnComplete { turn }
            | Event::AliveCellsCount { turn, .. }
            | Event::StateChange { turn, .. }
            | Event::ImageOutputComplete { turn, .. }
            | Event::FinalTurnComplete { turn, .. } => *turn,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::CellFlipped { turn, cell } => {
                write!(f, "turn {}: cell ({}, {}) flipped", turn, cell.x, cell.y)
            }
            Event::TurnComplete { turn } => write!(f, "turn {} complete", turn),
            Event::AliveCellsCount { turn, count } => {
                write!(f, "turn {}: {} cells alive", turn, count)
            }
            Event::StateChange { turn, state } => write!(f, "turn {}: {:?}", turn, state),
            Event::ImageOutputComplete { turn, filename } => {
                write!(f, "turn {}: wrote {}", turn, filename)
            }
            Event::FinalTurnComplete { turn, alive } => {
                write!(f, "final turn {}: {} cells alive", turn, alive.len())
            }
        }
    }
}

/// Cloneable sending side of the event stream. Closing it from any clone ends
/// the stream for the observer.
#[derive(Clone)]
pub struct EventSink {
    tx: Arc<Mutex<Option<UnboundedSender<Event>>>>,
}

impl EventSink {
    pub fn channel() -> (Self, UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            EventSink {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Returns false once the stream is closed or the observer has gone.
    pub fn emit(&self, event: Event) -> bool {
        let guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => {
                warn!("[EventSink] Dropped event after close: {}", event);
                false
            }
        }
    }

    pub fn close(&self) {
        self.tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }
}
