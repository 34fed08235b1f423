//! Controller-side handling of per-turn reports from the worker.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::events::{Event, EventSink};
use crate::error::{GolError, GolResult};
use crate::protocol::rpc::{dispatch, Handler};
use crate::protocol::{Ack, TurnReport, TurnReporter, REPORT_TURN};

pub struct TurnReportHandler {
    budget: u32,
    last_turn: AtomicU32,
    events: EventSink,
}

impl TurnReportHandler {
    pub fn new(budget: u32, events: EventSink) -> Self {
        TurnReportHandler {
            budget,
            last_turn: AtomicU32::new(0),
            events,
        }
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Last turn forwarded to the observer.
    pub fn last_turn(&self) -> u32 {
        self.last_turn.load(Ordering::Acquire)
    }

    /// Forwards a report as events. Reports at or past the budget are dropped;
    /// the final generation reaches the observer through the completion path.
    pub fn accept(&self, report: TurnReport) -> bool {
        if report.turn >= self.budget {
            debug!(
                "[Callback] Dropped stale report for turn {} (budget {})",
                report.turn, self.budget
            );
            return false;
        }

        let turn = report.turn;
        self.last_turn.store(turn, Ordering::Release);
        for cell in report.cells {
            self.events.emit(Event::CellFlipped { turn, cell });
        }
        self.events.emit(Event::TurnComplete { turn });
        true
    }
}

#[async_trait]
impl TurnReporter for TurnReportHandler {
    async fn report_turn(&self, report: TurnReport) -> GolResult<()> {
        self.accept(report);
        Ok(())
    }
}

/// Serves `Controller.ReportTurn` over the RPC transport.
pub struct ControllerService {
    handler: Arc<TurnReportHandler>,
}

impl ControllerService {
    pub fn new(handler: Arc<TurnReportHandler>) -> Self {
        ControllerService { handler }
    }
}

#[async_trait]
impl Handler for ControllerService {
    async fn handle(&self, method: &str, params: Value) -> GolResult<Value> {
        match method {
            REPORT_TURN => {
                let handler = &self.handler;
                dispatch(params, |report: TurnReport| async move {
                    handler.accept(report);
                    Ok(Ack {})
                })
                .await
            }
            other => Err(GolError::UnknownMethod(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Cell;
    use serde_json::json;

    #[tokio::test]
    async fn report_becomes_flips_then_turn_complete() {
        let (sink, mut rx) = EventSink::channel();
        let handler = TurnReportHandler::new(10, sink);

        assert!(handler.accept(TurnReport {
            turn: 1,
            cells: vec![Cell::new(0, 0), Cell::new(2, 1)],
        }));
        assert_eq!(handler.last_turn(), 1);

        assert_eq!(rx.recv().await, Some(Event::CellFlipped { turn: 1, cell: Cell::new(0, 0) }));
        assert_eq!(rx.recv().await, Some(Event::CellFlipped { turn: 1, cell: Cell::new(2, 1) }));
        assert_eq!(rx.recv().await, Some(Event::TurnComplete { turn: 1 }));
    }

    #[tokio::test]
    async fn reports_at_or_past_the_budget_are_dropped() {
        let (sink, mut rx) = EventSink::channel();
        let handler = TurnReportHandler::new(3, sink.clone());

        assert!(handler.accept(TurnReport { turn: 2, cells: vec![] }));
        assert!(!handler.accept(TurnReport { turn: 3, cells: vec![Cell::new(1, 1)] }));
        assert!(!handler.accept(TurnReport { turn: 4, cells: vec![] }));
        assert_eq!(handler.last_turn(), 2);

        sink.close();
        assert_eq!(rx.recv().await, Some(Event::TurnComplete { turn: 2 }));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn service_acks_reports_and_rejects_other_methods() {
        let (sink, mut rx) = EventSink::channel();
        let service = ControllerService::new(Arc::new(TurnReportHandler::new(5, sink)));

        let ack = service
            .handle(REPORT_TURN, json!({ "turn": 1, "cells": [] }))
            .await
            .unwrap();
        assert_eq!(ack, json!({}));
        assert_eq!(rx.recv().await, Some(Event::TurnComplete { turn: 1 }));

        assert!(matches!(
            service.handle("Controller.Nope", json!({})).await,
            Err(GolError::UnknownMethod(_))
        ));
    }
}
