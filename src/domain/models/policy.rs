//! Orchestrator policy models.
//!
//! Each (tenant, orchestrator agent) pair may carry a policy row bounding
//! what its graph may spawn, plus an allowlist of permitted target agents.
//! Spawns are evaluated against an immutable snapshot of the policy so that
//! every limit check within one call sees the same numbers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::group::FailurePolicy;
use super::identity::ScopeSet;

pub const DEFAULT_MAX_DEPTH: u32 = 3;
pub const DEFAULT_MAX_FANOUT: u32 = 8;
pub const DEFAULT_MAX_CHILDREN_TOTAL: u32 = 32;
pub const DEFAULT_JOIN_TIMEOUT_S: u32 = 60;

/// Persisted per-orchestrator policy row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorPolicy {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub orchestrator_agent_id: Uuid,
    pub is_active: bool,
    pub enforce_published_only: bool,
    pub default_failure_policy: FailurePolicy,
    pub max_depth: u32,
    pub max_fanout: u32,
    pub max_children_total: u32,
    pub join_timeout_s: u32,
    pub allowed_scope_subset: ScopeSet,
    pub capability_manifest_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrchestratorPolicy {
    pub fn new(tenant_id: Uuid, orchestrator_agent_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            orchestrator_agent_id,
            is_active: true,
            enforce_published_only: true,
            default_failure_policy: FailurePolicy::BestEffort,
            max_depth: DEFAULT_MAX_DEPTH,
            max_fanout: DEFAULT_MAX_FANOUT,
            max_children_total: DEFAULT_MAX_CHILDREN_TOTAL,
            join_timeout_s: DEFAULT_JOIN_TIMEOUT_S,
            allowed_scope_subset: ScopeSet::new(),
            capability_manifest_version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_limits(mut self, max_depth: u32, max_fanout: u32, max_children_total: u32) -> Self {
        self.max_depth = max_depth;
        self.max_fanout = max_fanout;
        self.max_children_total = max_children_total;
        self
    }

    pub fn with_allowed_scopes(mut self, scopes: ScopeSet) -> Self {
        self.allowed_scope_subset = scopes;
        self
    }

    pub fn with_join_timeout(mut self, join_timeout_s: u32) -> Self {
        self.join_timeout_s = join_timeout_s;
        self
    }
}

/// The effective policy at the moment of a spawn or group creation.
/// Embedded verbatim into the group row so joins and audits see the policy
/// that authorized the spawn, not the current one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub tenant_id: Uuid,
    pub orchestrator_agent_id: Uuid,
    pub enforce_published_only: bool,
    pub default_failure_policy: FailurePolicy,
    pub max_depth: u32,
    pub max_fanout: u32,
    pub max_children_total: u32,
    pub join_timeout_s: u32,
    pub allowed_scope_subset: ScopeSet,
}

impl PolicySnapshot {
    /// Defaulted snapshot for orchestrators without a policy row.
    pub fn defaults(tenant_id: Uuid, orchestrator_agent_id: Uuid) -> Self {
        Self {
            tenant_id,
            orchestrator_agent_id,
            enforce_published_only: true,
            default_failure_policy: FailurePolicy::BestEffort,
            max_depth: DEFAULT_MAX_DEPTH,
            max_fanout: DEFAULT_MAX_FANOUT,
            max_children_total: DEFAULT_MAX_CHILDREN_TOTAL,
            join_timeout_s: DEFAULT_JOIN_TIMEOUT_S,
            allowed_scope_subset: ScopeSet::new(),
        }
    }
}

impl From<&OrchestratorPolicy> for PolicySnapshot {
    fn from(row: &OrchestratorPolicy) -> Self {
        Self {
            tenant_id: row.tenant_id,
            orchestrator_agent_id: row.orchestrator_agent_id,
            enforce_published_only: row.enforce_published_only,
            default_failure_policy: row.default_failure_policy,
            max_depth: row.max_depth,
            max_fanout: row.max_fanout,
            max_children_total: row.max_children_total,
            join_timeout_s: row.join_timeout_s,
            allowed_scope_subset: row.allowed_scope_subset.clone(),
        }
    }
}

/// One allowlist row: a target agent an orchestrator may spawn, by id or slug.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub orchestrator_agent_id: Uuid,
    pub target_agent_id: Option<Uuid>,
    pub target_agent_slug: Option<String>,
    pub capability_tag: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl AllowlistEntry {
    pub fn for_agent_id(tenant_id: Uuid, orchestrator_agent_id: Uuid, target_agent_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            orchestrator_agent_id,
            target_agent_id: Some(target_agent_id),
            target_agent_slug: None,
            capability_tag: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn for_agent_slug(
        tenant_id: Uuid,
        orchestrator_agent_id: Uuid,
        slug: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            orchestrator_agent_id,
            target_agent_id: None,
            target_agent_slug: Some(slug.into()),
            capability_tag: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// Whether this entry permits the given target.
    pub fn matches(&self, target_id: Uuid, target_slug: &str) -> bool {
        self.target_agent_id.is_some_and(|id| id == target_id)
            || self.target_agent_slug.as_deref().is_some_and(|slug| slug == target_slug)
    }
}
