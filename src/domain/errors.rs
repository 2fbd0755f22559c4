//! Domain errors for the arbor orchestration kernel.

use thiserror::Error;
use uuid::Uuid;

/// A policy denial with a machine-readable reason code.
///
/// The `Display` strings are part of the public contract: callers (and the
/// graph validator's issue list) match on them, so changes here are breaking.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("Target agent is not published")]
    TargetNotPublished,

    #[error("Target agent is not allowlisted for this orchestrator")]
    TargetNotAllowlisted,

    #[error("Orchestrator has no target allowlist entries")]
    EmptyAllowlist,

    #[error("scope_subset is required")]
    ScopeSubsetRequired,

    #[error("scope_subset is not within caller effective scopes")]
    ScopeNotWithinCaller,

    #[error("scope_subset exceeds orchestrator policy capability set")]
    ScopeExceedsPolicy,

    #[error("delegation produced an empty effective scope set")]
    EmptyEffectiveScopes,

    #[error("missing required scope: {0}")]
    MissingScope(String),

    #[error("requested_children must be >= 1")]
    NoChildrenRequested,

    #[error("max_depth exceeded ({next} > {limit})")]
    MaxDepthExceeded { next: u32, limit: u32 },

    #[error("max_fanout exceeded ({requested} > {limit})")]
    MaxFanoutExceeded { requested: u32, limit: u32 },

    #[error("max_fanout exceeded for parent ({total} > {limit})")]
    MaxFanoutExceededForParent { total: u32, limit: u32 },

    #[error("max_children_total exceeded ({total} > {limit})")]
    MaxChildrenTotalExceeded { total: u32, limit: u32 },
}

impl PolicyViolation {
    /// Stable machine-readable code for logs and API payloads.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::TargetNotPublished => "target_not_published",
            Self::TargetNotAllowlisted => "target_not_allowlisted",
            Self::EmptyAllowlist => "empty_allowlist",
            Self::ScopeSubsetRequired => "scope_subset_required",
            Self::ScopeNotWithinCaller => "scope_not_within_caller",
            Self::ScopeExceedsPolicy => "scope_exceeds_policy",
            Self::EmptyEffectiveScopes => "empty_effective_scopes",
            Self::MissingScope(_) => "missing_scope",
            Self::NoChildrenRequested => "no_children_requested",
            Self::MaxDepthExceeded { .. } => "max_depth_exceeded",
            Self::MaxFanoutExceeded { .. } => "max_fanout_exceeded",
            Self::MaxFanoutExceededForParent { .. } => "max_fanout_exceeded_for_parent",
            Self::MaxChildrenTotalExceeded { .. } => "max_children_total_exceeded",
        }
    }
}

/// Errors surfaced by the orchestration kernel and its stores.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("{0} is disabled by feature flag for this tenant")]
    FeatureDisabled(&'static str),

    #[error("Tenant mismatch")]
    TenantMismatch,

    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    #[error("Orchestration group not found: {0}")]
    GroupNotFound(Uuid),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Delegation grant not found: {0}")]
    GrantNotFound(Uuid),

    #[error("Workload principal not found: {0}")]
    PrincipalNotFound(Uuid),

    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    #[error("Validation failed: {0}")]
    Validation(String),

    /// Internal sentinel for a `(parent_run_id, spawn_key)` collision.
    /// Caught by the spawn engine, which replays the existing child; this
    /// variant must never escape a kernel entry point.
    #[error("spawn key already used for parent {parent_run_id}: {spawn_key}")]
    SpawnKeyConflict { parent_run_id: Uuid, spawn_key: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Store conflict: {0}")]
    StoreConflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type KernelResult<T> = Result<T, KernelError>;

impl KernelError {
    /// Transport status mapping for surface adapters. Transport specifics
    /// stay out of the kernel; this keeps the kind-to-code table in one place.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::FeatureDisabled(_) | Self::TenantMismatch | Self::Policy(_) => 403,
            Self::RunNotFound(_)
            | Self::GroupNotFound(_)
            | Self::AgentNotFound(_)
            | Self::GrantNotFound(_)
            | Self::PrincipalNotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::SpawnKeyConflict { .. }
            | Self::InvalidStateTransition { .. }
            | Self::StoreConflict(_) => 409,
            Self::Database(_) | Self::Serialization(_) => 500,
        }
    }
}

impl From<sqlx::Error> for KernelError {
    fn from(err: sqlx::Error) -> Self {
        KernelError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for KernelError {
    fn from(err: serde_json::Error) -> Self {
        KernelError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_violations_map_to_403() {
        let err = KernelError::Policy(PolicyViolation::MaxFanoutExceeded { requested: 3, limit: 2 });
        assert_eq!(err.status_code(), 403);
        assert!(err.to_string().contains("max_fanout exceeded (3 > 2)"));
    }

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(
            PolicyViolation::MaxDepthExceeded { next: 2, limit: 1 }.reason(),
            "max_depth_exceeded"
        );
        assert_eq!(PolicyViolation::EmptyAllowlist.reason(), "empty_allowlist");
    }

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(KernelError::RunNotFound(Uuid::new_v4()).status_code(), 404);
        assert_eq!(KernelError::Validation("bad".into()).status_code(), 400);
    }
}
