//! Spawn engine: single-child and group spawns.
//!
//! Both operations serialize on the parent run, authorize against the
//! policy snapshot, attenuate scopes through the caller's grant, and
//! persist transactionally. Idempotency is layered: a fast-path lookup of
//! the spawn key (or group spawn scope) runs before authorization so that
//! replays always succeed, and the unique index remains the race-safe
//! enforcement point underneath.

use futures::future::try_join_all;
use tracing::info;
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{
    Agent, DelegationGrant, GroupMember, JoinMode, OrchestrationGroup, PolicySnapshot,
    PrincipalType, Run, ScopeSet,
};
use crate::domain::ports::{GroupSpawnBatch, SpawnedChild};

use super::{GroupSpawnOutcome, OrchestrationKernel, SpawnGroupSpec, SpawnOutcome, SpawnRunSpec};

impl OrchestrationKernel {
    /// Spawn one child run under the caller. Replays with the same
    /// idempotency key return the existing child unchanged.
    pub async fn spawn_run(&self, spec: SpawnRunSpec) -> KernelResult<SpawnOutcome> {
        let caller = self.require_run(spec.caller_run_id).await?;
        self.assert_runtime_enabled(caller.tenant_id)?;

        let _guard = self.locks.acquire(caller.id).await;

        // Replay fast path: the spawn key decides, not the current policy.
        if let Some(existing) = self.runs.get_by_spawn_key(caller.id, &spec.idempotency_key).await? {
            return Ok(SpawnOutcome { spawned_run_ids: vec![existing.id], idempotent: true });
        }

        let target = self.resolve_target(caller.tenant_id, &spec.target).await?;
        let policy = self.policy.get_policy(caller.tenant_id, caller.agent_id).await?;
        self.policy.assert_target_allowed(&policy, &target).await?;

        let caller_grant = self.caller_grant(&caller).await?;
        self.policy
            .assert_scope_subset(&spec.scope_subset, &policy, &caller_grant.effective_scopes)?;
        self.policy
            .assert_spawn_limits(&policy, caller.root_run_id, caller.id, caller.depth, 1)
            .await?;

        let (run, grant) = self
            .prepare_child(&caller, &caller_grant, &policy, &target, &spec.scope_subset,
                spec.input.clone(), spec.parent_node_id.clone(), spec.timeout_s, &spec.idempotency_key, None)
            .await?;

        match self.runs.persist_spawn(&run, &grant).await {
            Ok(()) => {}
            Err(KernelError::SpawnKeyConflict { .. }) => {
                // A racing replay won the insert; hand back its child.
                let existing = self
                    .runs
                    .get_by_spawn_key(caller.id, &spec.idempotency_key)
                    .await?
                    .ok_or_else(|| {
                        KernelError::StoreConflict(format!(
                            "spawn key {} collided but no child found",
                            spec.idempotency_key
                        ))
                    })?;
                return Ok(SpawnOutcome { spawned_run_ids: vec![existing.id], idempotent: true });
            }
            Err(err) => return Err(err),
        }

        info!(
            caller_run_id = %caller.id,
            child_run_id = %run.id,
            target_agent = %target.slug,
            depth = run.depth,
            "child run spawned"
        );

        // The lock must not be held across the interpreter hand-off.
        drop(_guard);
        if spec.start_background {
            self.launcher.launch(run.id).await?;
        }

        Ok(SpawnOutcome { spawned_run_ids: vec![run.id], idempotent: false })
    }

    /// Spawn a sibling group. The group and all members land in one
    /// transaction; replaying the same (parent node, prefix) returns the
    /// existing group and its member run ids.
    pub async fn spawn_group(&self, spec: SpawnGroupSpec) -> KernelResult<GroupSpawnOutcome> {
        let caller = self.require_run(spec.caller_run_id).await?;
        self.assert_runtime_enabled(caller.tenant_id)?;

        if spec.targets.is_empty() {
            return Err(KernelError::Validation("targets must not be empty".to_string()));
        }
        let member_count = u32::try_from(spec.targets.len())
            .map_err(|_| KernelError::Validation("too many targets".to_string()))?;
        if spec.join_mode == JoinMode::Quorum {
            match spec.quorum_threshold {
                Some(k) if k >= 1 && k <= member_count => {}
                Some(k) => {
                    return Err(KernelError::Validation(format!(
                        "quorum_threshold {k} must be between 1 and the member count {member_count}"
                    )))
                }
                None => {
                    return Err(KernelError::Validation(
                        "quorum mode requires a positive quorum_threshold".to_string(),
                    ))
                }
            }
        }

        let _guard = self.locks.acquire(caller.id).await;

        if let Some(existing) = self
            .replay_group(caller.id, spec.parent_node_id.as_deref(), &spec.idempotency_key_prefix)
            .await?
        {
            return Ok(existing);
        }

        let policy = self.policy.get_policy(caller.tenant_id, caller.agent_id).await?;
        let caller_grant = self.caller_grant(&caller).await?;
        self.policy
            .assert_scope_subset(&spec.scope_subset, &policy, &caller_grant.effective_scopes)?;
        self.policy
            .assert_spawn_limits(&policy, caller.root_run_id, caller.id, caller.depth, member_count)
            .await?;

        let group = OrchestrationGroup::new(
            caller.tenant_id,
            caller.id,
            spec.parent_node_id.clone(),
            spec.failure_policy.unwrap_or(policy.default_failure_policy),
            spec.join_mode,
            spec.quorum_threshold,
            spec.timeout_s.unwrap_or(policy.join_timeout_s),
            policy.clone(),
            spec.idempotency_key_prefix.clone(),
        );

        let mut children = Vec::with_capacity(spec.targets.len());
        for (ordinal, target_spec) in (0_u32..member_count).zip(spec.targets.iter()) {
            let target = self.resolve_target(caller.tenant_id, &target_spec.target).await?;
            self.policy.assert_target_allowed(&policy, &target).await?;

            let (run, grant) = self
                .prepare_child(&caller, &caller_grant, &policy, &target, &spec.scope_subset,
                    target_spec.input.clone(), spec.parent_node_id.clone(), spec.timeout_s,
                    &group.member_spawn_key(ordinal), Some(group.id))
                .await?;
            let member = GroupMember::new(group.id, run.id, ordinal);
            children.push(SpawnedChild { run, grant, member });
        }

        let batch = GroupSpawnBatch { group, children };
        match self.groups.persist_group_spawn(&batch).await {
            Ok(()) => {}
            Err(KernelError::SpawnKeyConflict { .. } | KernelError::StoreConflict(_)) => {
                // A racing replay created the group first; return its members.
                return self
                    .replay_group(caller.id, spec.parent_node_id.as_deref(), &spec.idempotency_key_prefix)
                    .await?
                    .ok_or_else(|| {
                        KernelError::StoreConflict(format!(
                            "group prefix {} collided but no group found",
                            spec.idempotency_key_prefix
                        ))
                    });
            }
            Err(err) => return Err(err),
        }

        let spawned_run_ids: Vec<Uuid> = batch.children.iter().map(|c| c.run.id).collect();
        info!(
            caller_run_id = %caller.id,
            group_id = %batch.group.id,
            member_count = spawned_run_ids.len(),
            join_mode = batch.group.join_mode.as_str(),
            "orchestration group spawned"
        );

        // The lock must not be held across the interpreter hand-off.
        drop(_guard);
        if spec.start_background {
            try_join_all(spawned_run_ids.iter().map(|run_id| self.launcher.launch(*run_id))).await?;
        }

        Ok(GroupSpawnOutcome {
            orchestration_group_id: batch.group.id,
            spawned_run_ids,
            idempotent: false,
        })
    }

    /// Shared per-child preparation: workload principal, attenuated grant,
    /// and the child run row (not yet persisted).
    #[allow(clippy::too_many_arguments)]
    async fn prepare_child(
        &self,
        caller: &Run,
        caller_grant: &DelegationGrant,
        policy: &PolicySnapshot,
        target: &Agent,
        scope_subset: &ScopeSet,
        input: serde_json::Value,
        parent_node_id: Option<String>,
        timeout_s: Option<u32>,
        spawn_key: &str,
        group_id: Option<Uuid>,
    ) -> KernelResult<(Run, DelegationGrant)> {
        let principal = self
            .identity
            .ensure_principal(
                caller.tenant_id,
                &format!("agent:{}", target.slug),
                &target.name,
                PrincipalType::Agent,
                caller.initiator_user_id,
                scope_subset,
                false,
            )
            .await?;

        let mut run = Run::child_of(caller, target.id, spawn_key)
            .with_parent_node(parent_node_id)
            .with_input(input)
            .with_timeout(timeout_s);
        if let Some(group_id) = group_id {
            run = run.with_group(group_id);
        }

        let grant = self
            .identity
            .derive_child_grant(caller_grant, principal.id, scope_subset, policy, Some(self.grant_ttl()))?
            .with_run(run.id);
        run = run.with_identity(caller.initiator_user_id, principal.id, grant.id);

        Ok((run, grant))
    }

    /// Group-level idempotent replay: look the group up by spawn scope and
    /// return its member run ids in ordinal order.
    async fn replay_group(
        &self,
        caller_run_id: Uuid,
        parent_node_id: Option<&str>,
        prefix: &str,
    ) -> KernelResult<Option<GroupSpawnOutcome>> {
        let Some(group) = self
            .groups
            .get_by_spawn_scope(caller_run_id, parent_node_id, prefix)
            .await?
        else {
            return Ok(None);
        };

        let members = self.groups.members(group.id).await?;
        Ok(Some(GroupSpawnOutcome {
            orchestration_group_id: group.id,
            spawned_run_ids: members.into_iter().map(|m| m.run_id).collect(),
            idempotent: true,
        }))
    }
}
