//! Run launcher port.
//!
//! The interpreter that actually executes a run's graph lives outside the
//! kernel. The kernel only hands freshly spawned run ids across this seam,
//! strictly after they are persisted.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::KernelResult;

#[async_trait]
pub trait RunLauncher: Send + Sync {
    /// Schedule background execution of a persisted run.
    async fn launch(&self, run_id: Uuid) -> KernelResult<()>;
}

/// Launcher that does nothing. Used when no interpreter is wired in and in
/// tests, where spawned runs are driven by hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRunLauncher;

#[async_trait]
impl RunLauncher for NullRunLauncher {
    async fn launch(&self, run_id: Uuid) -> KernelResult<()> {
        tracing::debug!(run_id = %run_id, "null launcher: skipping background start");
        Ok(())
    }
}
