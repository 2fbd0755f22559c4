//! Orchestrator policy service.
//!
//! Answers one question per spawn: is this orchestrator allowed to create
//! these children? Target checks fail closed: an orchestrator with no
//! allowlist entries may spawn nothing.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::domain::errors::{KernelResult, PolicyViolation};
use crate::domain::models::{Agent, PolicySnapshot, ScopeSet};
use crate::domain::ports::{PolicyRepository, RunRepository};

#[derive(Clone)]
pub struct PolicyService {
    policies: Arc<dyn PolicyRepository>,
    runs: Arc<dyn RunRepository>,
}

impl PolicyService {
    pub fn new(policies: Arc<dyn PolicyRepository>, runs: Arc<dyn RunRepository>) -> Self {
        Self { policies, runs }
    }

    /// Effective policy snapshot for (tenant, orchestrator agent). Falls back
    /// to the documented defaults when no active row exists.
    pub async fn get_policy(&self, tenant_id: Uuid, orchestrator_agent_id: Uuid) -> KernelResult<PolicySnapshot> {
        Ok(match self.policies.find(tenant_id, orchestrator_agent_id).await? {
            Some(row) => PolicySnapshot::from(&row),
            None => PolicySnapshot::defaults(tenant_id, orchestrator_agent_id),
        })
    }

    /// Assert the target agent may be spawned by this orchestrator:
    /// published when the policy demands it, and present on the allowlist.
    pub async fn assert_target_allowed(&self, policy: &PolicySnapshot, target: &Agent) -> KernelResult<()> {
        if policy.enforce_published_only && !target.is_published() {
            return Err(PolicyViolation::TargetNotPublished.into());
        }

        let allowlist = self
            .policies
            .allowlist(policy.tenant_id, policy.orchestrator_agent_id)
            .await?;
        if allowlist.is_empty() {
            return Err(PolicyViolation::EmptyAllowlist.into());
        }

        if !allowlist.iter().any(|entry| entry.matches(target.id, &target.slug)) {
            warn!(
                orchestrator_agent_id = %policy.orchestrator_agent_id,
                target_agent_id = %target.id,
                target_slug = %target.slug,
                "spawn target not allowlisted"
            );
            return Err(PolicyViolation::TargetNotAllowlisted.into());
        }
        Ok(())
    }

    /// Assert a requested scope subset is nonempty, within the caller's
    /// effective scopes, and within the policy's capability set when one is
    /// configured.
    pub fn assert_scope_subset(
        &self,
        scope_subset: &ScopeSet,
        policy: &PolicySnapshot,
        caller_effective_scopes: &ScopeSet,
    ) -> KernelResult<()> {
        if scope_subset.is_empty() {
            return Err(PolicyViolation::ScopeSubsetRequired.into());
        }
        if !scope_subset.is_subset(caller_effective_scopes) {
            return Err(PolicyViolation::ScopeNotWithinCaller.into());
        }
        if !policy.allowed_scope_subset.is_empty() && !scope_subset.is_subset(&policy.allowed_scope_subset) {
            return Err(PolicyViolation::ScopeExceedsPolicy.into());
        }
        Ok(())
    }

    /// Assert depth, per-call fanout, per-parent fanout, and whole-subtree
    /// totals — all against the same snapshot. Counting runs under the
    /// caller's lock, so concurrent spawns under one parent see exact counts.
    pub async fn assert_spawn_limits(
        &self,
        policy: &PolicySnapshot,
        root_run_id: Uuid,
        parent_run_id: Uuid,
        parent_depth: u32,
        requested_children: u32,
    ) -> KernelResult<()> {
        let next_depth = parent_depth + 1;
        if next_depth > policy.max_depth {
            return Err(PolicyViolation::MaxDepthExceeded { next: next_depth, limit: policy.max_depth }.into());
        }

        if requested_children < 1 {
            return Err(PolicyViolation::NoChildrenRequested.into());
        }
        if requested_children > policy.max_fanout {
            return Err(PolicyViolation::MaxFanoutExceeded {
                requested: requested_children,
                limit: policy.max_fanout,
            }
            .into());
        }

        let sibling_count = u32::try_from(self.runs.count_children(parent_run_id).await?).unwrap_or(u32::MAX);
        if sibling_count.saturating_add(requested_children) > policy.max_fanout {
            return Err(PolicyViolation::MaxFanoutExceededForParent {
                total: sibling_count + requested_children,
                limit: policy.max_fanout,
            }
            .into());
        }

        let total_children = u32::try_from(self.runs.count_descendants(root_run_id).await?).unwrap_or(u32::MAX);
        if total_children.saturating_add(requested_children) > policy.max_children_total {
            return Err(PolicyViolation::MaxChildrenTotalExceeded {
                total: total_children + requested_children,
                limit: policy.max_children_total,
            }
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqlitePolicyRepository, SqliteRunRepository,
    };
    use crate::domain::errors::KernelError;
    use crate::domain::models::{AllowlistEntry, OrchestratorPolicy, Run};

    fn scopes(items: &[&str]) -> ScopeSet {
        items.iter().copied().collect()
    }

    async fn setup() -> (PolicyService, Arc<SqlitePolicyRepository>, Arc<SqliteRunRepository>) {
        let pool = create_migrated_test_pool().await.unwrap();
        let policies = Arc::new(SqlitePolicyRepository::new(pool.clone()));
        let runs = Arc::new(SqliteRunRepository::new(pool));
        (PolicyService::new(policies.clone(), runs.clone()), policies, runs)
    }

    fn assert_policy_err(err: KernelError, expected: &PolicyViolation) {
        match err {
            KernelError::Policy(v) => assert_eq!(&v, expected),
            other => panic!("expected policy violation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_policy_defaults_when_no_row() {
        let (service, _, _) = setup().await;
        let snap = service.get_policy(Uuid::new_v4(), Uuid::new_v4()).await.unwrap();
        assert_eq!(snap.max_depth, 3);
        assert_eq!(snap.max_fanout, 8);
        assert_eq!(snap.max_children_total, 32);
    }

    #[tokio::test]
    async fn test_target_checks_fail_closed() {
        let (service, policies, _) = setup().await;
        let tenant = Uuid::new_v4();
        let orch = Uuid::new_v4();
        let policy = PolicySnapshot::defaults(tenant, orch);

        let published = Agent::new(tenant, "Worker", "worker").published();
        let draft = Agent::new(tenant, "Draft", "draft-agent");

        // Unpublished target rejected before the allowlist is even consulted.
        assert_policy_err(
            service.assert_target_allowed(&policy, &draft).await.unwrap_err(),
            &PolicyViolation::TargetNotPublished,
        );

        // No allowlist entries: reject everything.
        assert_policy_err(
            service.assert_target_allowed(&policy, &published).await.unwrap_err(),
            &PolicyViolation::EmptyAllowlist,
        );

        // Allowlisting a different agent still rejects this one.
        policies
            .add_allowlist_entry(&AllowlistEntry::for_agent_slug(tenant, orch, "someone-else"))
            .await
            .unwrap();
        assert_policy_err(
            service.assert_target_allowed(&policy, &published).await.unwrap_err(),
            &PolicyViolation::TargetNotAllowlisted,
        );

        // Allowlisted by id passes.
        policies
            .add_allowlist_entry(&AllowlistEntry::for_agent_id(tenant, orch, published.id))
            .await
            .unwrap();
        service.assert_target_allowed(&policy, &published).await.unwrap();
    }

    #[tokio::test]
    async fn test_scope_subset_assertions() {
        let (service, _, _) = setup().await;
        let mut policy = PolicySnapshot::defaults(Uuid::new_v4(), Uuid::new_v4());
        let caller = scopes(&["agents.execute", "tools.read"]);

        assert_policy_err(
            service.assert_scope_subset(&ScopeSet::new(), &policy, &caller).unwrap_err(),
            &PolicyViolation::ScopeSubsetRequired,
        );
        assert_policy_err(
            service
                .assert_scope_subset(&scopes(&["admin.write"]), &policy, &caller)
                .unwrap_err(),
            &PolicyViolation::ScopeNotWithinCaller,
        );

        // An empty policy subset imposes no cap.
        service
            .assert_scope_subset(&scopes(&["tools.read"]), &policy, &caller)
            .unwrap();

        policy.allowed_scope_subset = scopes(&["agents.execute"]);
        assert_policy_err(
            service
                .assert_scope_subset(&scopes(&["tools.read"]), &policy, &caller)
                .unwrap_err(),
            &PolicyViolation::ScopeExceedsPolicy,
        );
        service
            .assert_scope_subset(&scopes(&["agents.execute"]), &policy, &caller)
            .unwrap();
    }

    #[tokio::test]
    async fn test_spawn_limits_count_real_rows() {
        let (service, _, runs) = setup().await;
        let tenant = Uuid::new_v4();
        let root = Run::root(tenant, Uuid::new_v4());
        runs.create(&root).await.unwrap();

        let policy = PolicySnapshot {
            max_depth: 2,
            max_fanout: 2,
            max_children_total: 3,
            ..PolicySnapshot::defaults(tenant, Uuid::new_v4())
        };

        // Depth: a child of depth-2 parent would land at 3 > 2.
        assert_policy_err(
            service
                .assert_spawn_limits(&policy, root.id, root.id, 2, 1)
                .await
                .unwrap_err(),
            &PolicyViolation::MaxDepthExceeded { next: 3, limit: 2 },
        );

        // Per-call fanout.
        assert_policy_err(
            service
                .assert_spawn_limits(&policy, root.id, root.id, 0, 3)
                .await
                .unwrap_err(),
            &PolicyViolation::MaxFanoutExceeded { requested: 3, limit: 2 },
        );

        // Per-parent fanout counts existing children.
        let child = Run::child_of(&root, Uuid::new_v4(), "a");
        runs.create(&child).await.unwrap();
        assert_policy_err(
            service
                .assert_spawn_limits(&policy, root.id, root.id, 0, 2)
                .await
                .unwrap_err(),
            &PolicyViolation::MaxFanoutExceededForParent { total: 3, limit: 2 },
        );

        // Whole-subtree totals count every descendant of the root.
        let grandchild = Run::child_of(&child, Uuid::new_v4(), "b");
        runs.create(&grandchild).await.unwrap();
        let great = Run::child_of(&grandchild, Uuid::new_v4(), "c");
        runs.create(&great).await.unwrap();
        assert_policy_err(
            service
                .assert_spawn_limits(&policy, root.id, child.id, 1, 1)
                .await
                .unwrap_err(),
            &PolicyViolation::MaxChildrenTotalExceeded { total: 4, limit: 3 },
        );

        // Zero children is never a valid request.
        assert_policy_err(
            service
                .assert_spawn_limits(&policy, root.id, root.id, 0, 0)
                .await
                .unwrap_err(),
            &PolicyViolation::NoChildrenRequested,
        );
    }

    #[tokio::test]
    async fn test_policy_row_overrides_defaults() {
        let (service, policies, _) = setup().await;
        let tenant = Uuid::new_v4();
        let orch = Uuid::new_v4();

        policies
            .upsert(&OrchestratorPolicy::new(tenant, orch).with_limits(1, 2, 16))
            .await
            .unwrap();

        let snap = service.get_policy(tenant, orch).await.unwrap();
        assert_eq!(snap.max_depth, 1);
        assert_eq!(snap.max_fanout, 2);
        assert_eq!(snap.max_children_total, 16);
    }
}
