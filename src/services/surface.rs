//! Surface adapter: thin request binding into the kernel.
//!
//! Transport-agnostic: whatever serves requests resolves a caller principal
//! (tenant + scopes) and hands serde DTOs here. This layer requires the
//! `agents.execute` scope, asserts the caller's tenant matches the caller
//! run's tenant, and delegates. `KernelError::status_code` gives transports
//! the kind-to-code mapping.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult, PolicyViolation};
use crate::domain::models::{FailurePolicy, JoinMode, ScopeSet, SCOPE_AGENTS_EXECUTE, SCOPE_WILDCARD};
use crate::services::kernel::{
    CancelOutcome, GroupSpawnOutcome, GroupTargetSpec, JoinOutcome, JoinSpec, OrchestrationKernel,
    ReplanOutcome, RunTree, SpawnGroupSpec, SpawnOutcome, SpawnRunSpec, TargetRef,
};

/// The authenticated caller of a surface operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallerPrincipal {
    pub tenant_id: Uuid,
    pub scopes: ScopeSet,
}

impl CallerPrincipal {
    pub fn new(tenant_id: Uuid, scopes: ScopeSet) -> Self {
        Self { tenant_id, scopes }
    }

    fn is_wildcard(&self) -> bool {
        self.scopes.contains(SCOPE_WILDCARD)
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnRunRequest {
    pub caller_run_id: Uuid,
    #[serde(default)]
    pub parent_node_id: Option<String>,
    #[serde(default)]
    pub target_agent_id: Option<Uuid>,
    #[serde(default)]
    pub target_agent_slug: Option<String>,
    #[serde(default)]
    pub mapped_input_payload: serde_json::Value,
    #[serde(default)]
    pub failure_policy: Option<FailurePolicy>,
    #[serde(default)]
    pub timeout_s: Option<u32>,
    #[serde(default)]
    pub scope_subset: ScopeSet,
    pub idempotency_key: String,
    #[serde(default = "default_true")]
    pub start_background: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnGroupTargetRequest {
    #[serde(default)]
    pub target_agent_id: Option<Uuid>,
    #[serde(default)]
    pub target_agent_slug: Option<String>,
    #[serde(default)]
    pub mapped_input_payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnGroupRequest {
    pub caller_run_id: Uuid,
    #[serde(default)]
    pub parent_node_id: Option<String>,
    #[serde(default)]
    pub targets: Vec<SpawnGroupTargetRequest>,
    #[serde(default)]
    pub failure_policy: Option<FailurePolicy>,
    pub join_mode: JoinMode,
    #[serde(default)]
    pub quorum_threshold: Option<u32>,
    #[serde(default)]
    pub timeout_s: Option<u32>,
    #[serde(default)]
    pub scope_subset: ScopeSet,
    pub idempotency_key_prefix: String,
    #[serde(default = "default_true")]
    pub start_background: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub caller_run_id: Uuid,
    pub orchestration_group_id: Uuid,
    #[serde(default)]
    pub mode: Option<JoinMode>,
    #[serde(default)]
    pub quorum_threshold: Option<u32>,
    #[serde(default)]
    pub timeout_s: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSubtreeRequest {
    pub caller_run_id: Uuid,
    pub run_id: Uuid,
    #[serde(default = "default_true")]
    pub include_root: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateAndReplanRequest {
    pub caller_run_id: Uuid,
    pub run_id: Uuid,
}

/// Request layer over the orchestration kernel.
#[derive(Clone)]
pub struct OrchestrationSurface {
    kernel: Arc<OrchestrationKernel>,
}

impl OrchestrationSurface {
    pub fn new(kernel: Arc<OrchestrationKernel>) -> Self {
        Self { kernel }
    }

    pub async fn spawn_run(&self, principal: &CallerPrincipal, request: SpawnRunRequest) -> KernelResult<SpawnOutcome> {
        self.authorize(principal, request.caller_run_id).await?;
        let target = TargetRef::from_parts(request.target_agent_id, request.target_agent_slug)?;
        self.kernel
            .spawn_run(SpawnRunSpec {
                caller_run_id: request.caller_run_id,
                parent_node_id: request.parent_node_id,
                target,
                input: request.mapped_input_payload,
                timeout_s: request.timeout_s,
                scope_subset: request.scope_subset,
                idempotency_key: request.idempotency_key,
                start_background: request.start_background,
            })
            .await
    }

    pub async fn spawn_group(
        &self,
        principal: &CallerPrincipal,
        request: SpawnGroupRequest,
    ) -> KernelResult<GroupSpawnOutcome> {
        self.authorize(principal, request.caller_run_id).await?;
        let targets = request
            .targets
            .into_iter()
            .map(|t| {
                Ok(GroupTargetSpec {
                    target: TargetRef::from_parts(t.target_agent_id, t.target_agent_slug)?,
                    input: t.mapped_input_payload,
                })
            })
            .collect::<KernelResult<Vec<_>>>()?;

        self.kernel
            .spawn_group(SpawnGroupSpec {
                caller_run_id: request.caller_run_id,
                parent_node_id: request.parent_node_id,
                targets,
                failure_policy: request.failure_policy,
                join_mode: request.join_mode,
                quorum_threshold: request.quorum_threshold,
                timeout_s: request.timeout_s,
                scope_subset: request.scope_subset,
                idempotency_key_prefix: request.idempotency_key_prefix,
                start_background: request.start_background,
            })
            .await
    }

    pub async fn join(&self, principal: &CallerPrincipal, request: JoinRequest) -> KernelResult<JoinOutcome> {
        self.authorize(principal, request.caller_run_id).await?;
        self.kernel
            .join(JoinSpec {
                caller_run_id: request.caller_run_id,
                orchestration_group_id: request.orchestration_group_id,
                mode: request.mode,
                quorum_threshold: request.quorum_threshold,
                timeout_s: request.timeout_s,
            })
            .await
    }

    pub async fn cancel_subtree(
        &self,
        principal: &CallerPrincipal,
        request: CancelSubtreeRequest,
    ) -> KernelResult<CancelOutcome> {
        self.authorize(principal, request.caller_run_id).await?;
        self.kernel
            .cancel_subtree(
                request.caller_run_id,
                request.run_id,
                request.include_root,
                request.reason.as_deref(),
            )
            .await
    }

    pub async fn evaluate_and_replan(
        &self,
        principal: &CallerPrincipal,
        request: EvaluateAndReplanRequest,
    ) -> KernelResult<ReplanOutcome> {
        self.authorize(principal, request.caller_run_id).await?;
        self.kernel.evaluate_and_replan(request.caller_run_id, request.run_id).await
    }

    pub async fn query_tree(&self, principal: &CallerPrincipal, run_id: Uuid) -> KernelResult<RunTree> {
        self.authorize(principal, run_id).await?;
        self.kernel.query_tree(run_id).await
    }

    /// Require `agents.execute` and a tenant matching the caller run.
    /// The wildcard scope is the internal bypass for system callers.
    async fn authorize(&self, principal: &CallerPrincipal, caller_run_id: Uuid) -> KernelResult<()> {
        if !principal.scopes.contains(SCOPE_AGENTS_EXECUTE) && !principal.is_wildcard() {
            return Err(PolicyViolation::MissingScope(SCOPE_AGENTS_EXECUTE.to_string()).into());
        }

        let caller_run = self.kernel.require_run(caller_run_id).await?;
        if !principal.is_wildcard() && principal.tenant_id != caller_run.tenant_id {
            return Err(KernelError::TenantMismatch);
        }
        Ok(())
    }
}
