//! Shared fixture for kernel integration tests.
//!
//! Seeds one tenant with a published orchestrator + target agent, a SYSTEM
//! workload principal with an auto-approved scope policy, a delegation
//! grant, a running root run, and an orchestrator policy + allowlist row.

#![allow(dead_code)]

use std::sync::Arc;

use sqlx::SqlitePool;
use uuid::Uuid;

use arbor::adapters::sqlite::{
    create_migrated_test_pool, SqliteAgentRepository, SqliteGroupRepository,
    SqliteIdentityRepository, SqlitePolicyRepository, SqliteRunRepository,
};
use arbor::domain::models::{
    Agent, AllowlistEntry, DelegationGrant, OrchestrationConfig, OrchestratorPolicy,
    PrincipalType, Run, RunStatus, ScopeSet,
};
use arbor::domain::ports::{AgentRepository, PolicyRepository, RunRepository};
use arbor::services::{
    GraphValidator, OrchestrationKernel, OrchestrationSurface, PolicyService,
    WorkloadIdentityService,
};

pub fn scopes(items: &[&str]) -> ScopeSet {
    items.iter().copied().collect()
}

/// Policy limits used when seeding the fixture.
#[derive(Debug, Clone)]
pub struct FixtureLimits {
    pub max_depth: u32,
    pub max_fanout: u32,
    pub max_children_total: u32,
    pub join_timeout_s: u32,
}

impl Default for FixtureLimits {
    fn default() -> Self {
        Self { max_depth: 4, max_fanout: 16, max_children_total: 64, join_timeout_s: 90 }
    }
}

pub struct Fixture {
    pub pool: SqlitePool,
    pub runs: Arc<SqliteRunRepository>,
    pub groups: Arc<SqliteGroupRepository>,
    pub agents: Arc<SqliteAgentRepository>,
    pub policies: Arc<SqlitePolicyRepository>,
    pub identity: WorkloadIdentityService,
    pub kernel: Arc<OrchestrationKernel>,
    pub surface: OrchestrationSurface,
    pub validator: GraphValidator,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub orchestrator: Agent,
    pub target: Agent,
    pub root_run: Run,
    pub grant: DelegationGrant,
}

pub async fn setup() -> Fixture {
    setup_with(FixtureLimits::default(), OrchestrationConfig::default()).await
}

pub async fn setup_with_limits(limits: FixtureLimits) -> Fixture {
    setup_with(limits, OrchestrationConfig::default()).await
}

pub async fn setup_with(limits: FixtureLimits, orchestration: OrchestrationConfig) -> Fixture {
    let pool = create_migrated_test_pool().await.unwrap();
    let runs = Arc::new(SqliteRunRepository::new(pool.clone()));
    let groups = Arc::new(SqliteGroupRepository::new(pool.clone()));
    let agents = Arc::new(SqliteAgentRepository::new(pool.clone()));
    let policies = Arc::new(SqlitePolicyRepository::new(pool.clone()));
    let identity = WorkloadIdentityService::new(Arc::new(SqliteIdentityRepository::new(pool.clone())));
    let policy_service = PolicyService::new(policies.clone(), runs.clone());

    let tenant_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();

    let orchestrator = Agent::new(tenant_id, "Orchestrator", "orchestrator").published();
    let target = Agent::new(tenant_id, "Target", "target").published();
    agents.create(&orchestrator).await.unwrap();
    agents.create(&target).await.unwrap();

    let principal = identity
        .ensure_principal(
            tenant_id,
            &format!("agent:{}", orchestrator.slug),
            "Orchestrator Principal",
            PrincipalType::System,
            Some(user_id),
            &scopes(&["agents.execute"]),
            true,
        )
        .await
        .unwrap();

    let grant = identity
        .create_delegation_grant(tenant_id, principal.id, Some(user_id), &scopes(&["agents.execute"]), None)
        .await
        .unwrap();

    let mut root_run = Run::root(tenant_id, orchestrator.id)
        .with_identity(Some(user_id), principal.id, grant.id);
    root_run.transition_to(RunStatus::Running).unwrap();
    runs.create(&root_run).await.unwrap();

    policies
        .upsert(
            &OrchestratorPolicy::new(tenant_id, orchestrator.id)
                .with_limits(limits.max_depth, limits.max_fanout, limits.max_children_total)
                .with_join_timeout(limits.join_timeout_s)
                .with_allowed_scopes(scopes(&["agents.execute"])),
        )
        .await
        .unwrap();
    policies
        .add_allowlist_entry(&AllowlistEntry::for_agent_id(tenant_id, orchestrator.id, target.id))
        .await
        .unwrap();

    let kernel = Arc::new(OrchestrationKernel::new(
        runs.clone(),
        groups.clone(),
        agents.clone(),
        policy_service.clone(),
        identity.clone(),
        orchestration.clone(),
    ));
    let surface = OrchestrationSurface::new(kernel.clone());
    let validator = GraphValidator::new(policy_service, agents.clone(), orchestration);

    Fixture {
        pool,
        runs,
        groups,
        agents,
        policies,
        identity,
        kernel,
        surface,
        validator,
        tenant_id,
        user_id,
        orchestrator,
        target,
        root_run,
        grant,
    }
}

impl Fixture {
    /// Drive a run to the given status directly through the store.
    pub async fn set_status(&self, run_id: Uuid, status: RunStatus) {
        self.runs.update_status(run_id, status).await.unwrap();
    }

    /// Pretend the group started in the past so timeouts fire immediately.
    pub async fn backdate_group(&self, group_id: Uuid, seconds: i64) {
        let started = chrono::Utc::now() - chrono::Duration::seconds(seconds);
        sqlx::query("UPDATE orchestration_groups SET started_at = ? WHERE id = ?")
            .bind(started.to_rfc3339())
            .bind(group_id.to_string())
            .execute(&self.pool)
            .await
            .unwrap();
    }

    pub async fn run_status(&self, run_id: Uuid) -> RunStatus {
        self.runs.get(run_id).await.unwrap().unwrap().status
    }
}
