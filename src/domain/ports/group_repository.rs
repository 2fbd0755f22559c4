//! Orchestration group repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::KernelResult;
use crate::domain::models::{
    DelegationGrant, GroupMember, GroupStatus, OrchestrationGroup, Run, RunStatus,
};

/// Everything one group spawn persists atomically: the group row plus, per
/// child, its run, delegation grant, and membership row.
#[derive(Debug, Clone)]
pub struct GroupSpawnBatch {
    pub group: OrchestrationGroup,
    pub children: Vec<SpawnedChild>,
}

#[derive(Debug, Clone)]
pub struct SpawnedChild {
    pub run: Run,
    pub grant: DelegationGrant,
    pub member: GroupMember,
}

/// Repository interface for orchestration groups and their members.
#[async_trait]
pub trait GroupRepository: Send + Sync {
    /// Persist a full group spawn in one transaction; either every row lands
    /// or none do. Spawn-key collisions surface as `SpawnKeyConflict`, a
    /// group spawn-scope collision as `StoreConflict`.
    async fn persist_group_spawn(&self, batch: &GroupSpawnBatch) -> KernelResult<()>;

    /// Get a group by ID.
    async fn get(&self, id: Uuid) -> KernelResult<Option<OrchestrationGroup>>;

    /// Look up a group by its spawn scope: the parent run, the spawning graph
    /// node, and the idempotency key prefix.
    async fn get_by_spawn_scope(
        &self,
        orchestrator_run_id: Uuid,
        parent_node_id: Option<&str>,
        idempotency_key_prefix: &str,
    ) -> KernelResult<Option<OrchestrationGroup>>;

    /// Member rows of a group, ordered by (ordinal, created_at).
    async fn members(&self, group_id: Uuid) -> KernelResult<Vec<GroupMember>>;

    /// Member rows joined with their runs, in ordinal order.
    async fn member_runs(&self, group_id: Uuid) -> KernelResult<Vec<(GroupMember, Run)>>;

    /// Mirror a member run's status onto its membership row.
    async fn update_member_status(&self, group_id: Uuid, run_id: Uuid, status: RunStatus) -> KernelResult<()>;

    /// Drive the group to a terminal status, stamping `completed_at`. Returns
    /// false when the group was already terminal (the transition happened
    /// exactly once, somewhere else).
    async fn complete(&self, group_id: Uuid, status: GroupStatus) -> KernelResult<bool>;
}
