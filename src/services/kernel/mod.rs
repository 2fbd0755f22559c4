//! The orchestration kernel.
//!
//! Implements the runtime primitives a parent run's interpreter calls:
//! spawn_run, spawn_group, join, cancel_subtree, evaluate_and_replan, and
//! query_tree. Every operation runs gated, tenant-checked, and serialized
//! by a per-key lock (parent run for spawns, group for joins).

mod cancel;
mod join;
mod spawn;

pub use join::{
    evaluate_join, CancellationPropagated, JoinDecision, JoinOutcome, JoinStatus, MemberSummary,
};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{
    Agent, DelegationGrant, FailurePolicy, JoinMode, OrchestrationConfig, OrchestrationGroup, Run,
    RunStatus, ScopeSet,
};
use crate::domain::ports::{
    AgentRepository, GroupRepository, NullRunLauncher, RunLauncher, RunRepository,
};
use crate::services::identity::WorkloadIdentityService;
use crate::services::locks::KeyedLocks;
use crate::services::policy::PolicyService;

/// Surface names used in FeatureDisabled errors.
pub const SURFACE_RUNTIME_PRIMITIVES: &str = "Runtime orchestration primitives";
pub const SURFACE_GRAPH_V2: &str = "GraphSpec v2 orchestration nodes";

/// A spawn target addressed by id or slug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetRef {
    Id(Uuid),
    Slug(String),
}

impl TargetRef {
    /// Build from the optional id/slug pair carried by requests; the id wins
    /// when both are present, neither is a validation error.
    pub fn from_parts(id: Option<Uuid>, slug: Option<String>) -> KernelResult<Self> {
        match (id, slug) {
            (Some(id), _) => Ok(Self::Id(id)),
            (None, Some(slug)) => Ok(Self::Slug(slug)),
            (None, None) => Err(KernelError::Validation(
                "target_agent_id or target_agent_slug is required".to_string(),
            )),
        }
    }
}

/// Arguments of a single-child spawn.
#[derive(Debug, Clone)]
pub struct SpawnRunSpec {
    pub caller_run_id: Uuid,
    pub parent_node_id: Option<String>,
    pub target: TargetRef,
    pub input: serde_json::Value,
    pub timeout_s: Option<u32>,
    pub scope_subset: ScopeSet,
    pub idempotency_key: String,
    pub start_background: bool,
}

/// One target of a group spawn.
#[derive(Debug, Clone)]
pub struct GroupTargetSpec {
    pub target: TargetRef,
    pub input: serde_json::Value,
}

/// Arguments of a group spawn.
#[derive(Debug, Clone)]
pub struct SpawnGroupSpec {
    pub caller_run_id: Uuid,
    pub parent_node_id: Option<String>,
    pub targets: Vec<GroupTargetSpec>,
    pub failure_policy: Option<FailurePolicy>,
    pub join_mode: JoinMode,
    pub quorum_threshold: Option<u32>,
    pub timeout_s: Option<u32>,
    pub scope_subset: ScopeSet,
    pub idempotency_key_prefix: String,
    pub start_background: bool,
}

/// Arguments of a join evaluation.
#[derive(Debug, Clone)]
pub struct JoinSpec {
    pub caller_run_id: Uuid,
    pub orchestration_group_id: Uuid,
    pub mode: Option<JoinMode>,
    pub quorum_threshold: Option<u32>,
    pub timeout_s: Option<u32>,
}

/// Result of spawn_run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnOutcome {
    pub spawned_run_ids: Vec<Uuid>,
    pub idempotent: bool,
}

/// Result of spawn_group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSpawnOutcome {
    pub orchestration_group_id: Uuid,
    pub spawned_run_ids: Vec<Uuid>,
    pub idempotent: bool,
}

/// Result of cancel_subtree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub cancelled_count: u64,
}

/// Result of evaluate_and_replan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplanOutcome {
    pub failed_count: u64,
    pub completed_count: u64,
    pub running_count: u64,
    pub needs_replan: bool,
}

/// One node of a query_tree response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub run_id: Uuid,
    pub parent_run_id: Option<Uuid>,
    pub depth: u32,
    pub status: RunStatus,
}

/// Result of query_tree: the subtree in BFS order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTree {
    pub nodes: Vec<TreeNode>,
}

#[derive(Clone)]
pub struct OrchestrationKernel {
    runs: Arc<dyn RunRepository>,
    groups: Arc<dyn GroupRepository>,
    agents: Arc<dyn AgentRepository>,
    policy: PolicyService,
    identity: WorkloadIdentityService,
    launcher: Arc<dyn RunLauncher>,
    config: OrchestrationConfig,
    locks: KeyedLocks,
}

impl OrchestrationKernel {
    pub fn new(
        runs: Arc<dyn RunRepository>,
        groups: Arc<dyn GroupRepository>,
        agents: Arc<dyn AgentRepository>,
        policy: PolicyService,
        identity: WorkloadIdentityService,
        config: OrchestrationConfig,
    ) -> Self {
        Self {
            runs,
            groups,
            agents,
            policy,
            identity,
            launcher: Arc::new(NullRunLauncher),
            config,
            locks: KeyedLocks::new(),
        }
    }

    /// Wire in the interpreter hand-off used for background launches.
    pub fn with_launcher(mut self, launcher: Arc<dyn RunLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn runtime_surface_enabled(&self, tenant_id: Uuid) -> bool {
        self.config.runtime_primitives.allows(Some(tenant_id))
    }

    pub(crate) fn assert_runtime_enabled(&self, tenant_id: Uuid) -> KernelResult<()> {
        if self.runtime_surface_enabled(tenant_id) {
            Ok(())
        } else {
            Err(KernelError::FeatureDisabled(SURFACE_RUNTIME_PRIMITIVES))
        }
    }

    pub(crate) fn grant_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.config.grant_ttl_s))
    }

    pub(crate) async fn require_run(&self, id: Uuid) -> KernelResult<Run> {
        self.runs.get(id).await?.ok_or(KernelError::RunNotFound(id))
    }

    pub(crate) async fn require_group(&self, id: Uuid) -> KernelResult<OrchestrationGroup> {
        self.groups.get(id).await?.ok_or(KernelError::GroupNotFound(id))
    }

    /// Resolve a spawn target within the caller's tenant. Cross-tenant
    /// targets are indistinguishable from missing ones.
    pub(crate) async fn resolve_target(&self, tenant_id: Uuid, target: &TargetRef) -> KernelResult<Agent> {
        match target {
            TargetRef::Id(id) => {
                let agent = self
                    .agents
                    .get(*id)
                    .await?
                    .filter(|a| a.tenant_id == tenant_id)
                    .ok_or_else(|| KernelError::AgentNotFound(id.to_string()))?;
                Ok(agent)
            }
            TargetRef::Slug(slug) => self
                .agents
                .find_by_slug(tenant_id, slug)
                .await?
                .ok_or_else(|| KernelError::AgentNotFound(slug.clone())),
        }
    }

    /// The caller's delegation grant; spawning without one is a validation
    /// error since there is nothing to attenuate from.
    pub(crate) async fn caller_grant(&self, caller: &Run) -> KernelResult<DelegationGrant> {
        let grant_id = caller.delegation_grant_id.ok_or_else(|| {
            KernelError::Validation(format!("caller run {} has no delegation grant", caller.id))
        })?;
        self.identity.get_grant(grant_id).await
    }
}
