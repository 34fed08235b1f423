//! Grid input/output collaborators used by the controller.

pub mod pgm;

use async_trait::async_trait;

use crate::engine::World;
use crate::error::GolResult;

pub use pgm::PgmStore;

/// Supplies initial worlds by name.
#[async_trait]
pub trait GridInput: Send + Sync {
    async fn load(&self, name: &str, width: usize, height: usize) -> GolResult<World>;
}

/// Accepts worlds for export.
///
/// `export` only queues the write; `wait_idle` resolves once everything queued
/// before it has been flushed.
#[async_trait]
pub trait GridOutput: Send + Sync {
    async fn export(&self, name: &str, world: &World) -> GolResult<()>;

    async fn wait_idle(&self) -> GolResult<()>;
}
