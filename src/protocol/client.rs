//! Typed clients for both service interfaces.

use async_trait::async_trait;
use std::sync::Arc;

use super::rpc::RpcClient;
use super::{
    Ack, CommandRequest, CommandResponse, CountRequest, CountResponse, ReporterDialer, RunRequest,
    RunResponse, TurnReport, TurnReporter, WorkerApi, WorkerCommand, COMMAND, COUNT, REPORT_TURN,
    RUN,
};
use crate::error::GolResult;

/// Controller's handle on a remote worker.
pub struct WorkerClient {
    rpc: RpcClient,
}

impl WorkerClient {
    pub async fn dial(addr: &str) -> GolResult<Self> {
        Ok(WorkerClient {
            rpc: RpcClient::dial(addr).await?,
        })
    }
}

#[async_trait]
impl WorkerApi for WorkerClient {
    async fn run(&self, request: RunRequest) -> GolResult<RunResponse> {
        self.rpc.call(RUN, &request).await
    }

    async fn count(&self) -> GolResult<CountResponse> {
        self.rpc.call(COUNT, &CountRequest {}).await
    }

    async fn command(&self, command: WorkerCommand) -> GolResult<CommandResponse> {
        self.rpc.call(COMMAND, &CommandRequest { command }).await
    }
}

/// Worker's handle on the controller's callback service.
pub struct ControllerClient {
    rpc: RpcClient,
}

impl ControllerClient {
    pub async fn dial(addr: &str) -> GolResult<Self> {
        Ok(ControllerClient {
            rpc: RpcClient::dial(addr).await?,
        })
    }
}

#[async_trait]
impl TurnReporter for ControllerClient {
    async fn report_turn(&self, report: TurnReport) -> GolResult<()> {
        let _: Ack = self.rpc.call(REPORT_TURN, &report).await?;
        Ok(())
    }
}

/// Dials the controller's callback endpoint afresh for every run.
pub struct TcpReporterDialer {
    addr: String,
}

impl TcpReporterDialer {
    pub fn new(addr: impl Into<String>) -> Self {
        TcpReporterDialer { addr: addr.into() }
    }
}

#[async_trait]
impl ReporterDialer for TcpReporterDialer {
    async fn dial(&self) -> GolResult<Arc<dyn TurnReporter>> {
        Ok(Arc::new(ControllerClient::dial(&self.addr).await?))
    }
}
