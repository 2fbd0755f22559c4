//! Run repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::KernelResult;
use crate::domain::models::{DelegationGrant, Run, RunStatus};

/// Repository interface for Run persistence and lineage queries.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Persist a run. A `(parent_run_id, spawn_key)` collision surfaces as
    /// `KernelError::SpawnKeyConflict`.
    async fn create(&self, run: &Run) -> KernelResult<()>;

    /// Persist a spawned child run together with its delegation grant in a
    /// single transaction. Same conflict contract as [`create`](Self::create).
    async fn persist_spawn(&self, run: &Run, grant: &DelegationGrant) -> KernelResult<()>;

    /// Get a run by ID.
    async fn get(&self, id: Uuid) -> KernelResult<Option<Run>>;

    /// Look up the child of `parent_run_id` carrying `spawn_key`.
    async fn get_by_spawn_key(&self, parent_run_id: Uuid, spawn_key: &str) -> KernelResult<Option<Run>>;

    /// Direct children of a run, ordered by creation time. Backs BFS walks.
    async fn list_children(&self, parent_run_id: Uuid) -> KernelResult<Vec<Run>>;

    /// Number of direct children of a run.
    async fn count_children(&self, parent_run_id: Uuid) -> KernelResult<u64>;

    /// Number of non-root runs in the tree rooted at `root_run_id`.
    async fn count_descendants(&self, root_run_id: Uuid) -> KernelResult<u64>;

    /// Transition a run's status. Transitions out of a terminal status are
    /// rejected with `InvalidStateTransition`.
    async fn update_status(&self, id: Uuid, status: RunStatus) -> KernelResult<()>;

    /// Cancel a run only if it is still active, recording the reason in the
    /// run's output metadata. Returns whether a transition happened; terminal
    /// runs are left untouched.
    async fn cancel_if_active(&self, id: Uuid, reason: Option<&str>) -> KernelResult<bool>;
}
