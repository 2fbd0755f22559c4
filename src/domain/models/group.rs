//! Orchestration group domain model.
//!
//! A group is the sibling set produced by one spawn_group call. The join
//! engine drives it to exactly one terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::policy::PolicySnapshot;
use super::run::RunStatus;

/// Completion rule evaluated over a group's members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    All,
    Quorum,
    FirstSuccess,
    BestEffort,
    FailFast,
}

impl JoinMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Quorum => "quorum",
            Self::FirstSuccess => "first_success",
            Self::BestEffort => "best_effort",
            Self::FailFast => "fail_fast",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "all" => Some(Self::All),
            "quorum" => Some(Self::Quorum),
            "first_success" => Some(Self::FirstSuccess),
            "best_effort" => Some(Self::BestEffort),
            "fail_fast" => Some(Self::FailFast),
            _ => None,
        }
    }
}

/// Per-group hint influencing default join behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    BestEffort,
    FailFast,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::BestEffort
    }
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BestEffort => "best_effort",
            Self::FailFast => "fail_fast",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "best_effort" => Some(Self::BestEffort),
            "fail_fast" => Some(Self::FailFast),
            _ => None,
        }
    }
}

/// Status of an orchestration group. Reaches a terminal value exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
    TimedOut,
    Cancelled,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "completed_with_errors" => Some(Self::CompletedWithErrors),
            "failed" => Some(Self::Failed),
            "timed_out" => Some(Self::TimedOut),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// A sibling set produced by one spawn_group call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationGroup {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// The parent run whose graph spawned this group.
    pub orchestrator_run_id: Uuid,
    pub parent_node_id: Option<String>,
    pub failure_policy: FailurePolicy,
    pub join_mode: JoinMode,
    pub quorum_threshold: Option<u32>,
    pub timeout_s: u32,
    pub status: GroupStatus,
    /// The effective policy at creation; joins evaluate against this.
    pub policy_snapshot: PolicySnapshot,
    /// Prefix from which per-member spawn keys are derived; unique per
    /// (orchestrator_run_id, parent_node_id).
    pub idempotency_key_prefix: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrchestrationGroup {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: Uuid,
        orchestrator_run_id: Uuid,
        parent_node_id: Option<String>,
        failure_policy: FailurePolicy,
        join_mode: JoinMode,
        quorum_threshold: Option<u32>,
        timeout_s: u32,
        policy_snapshot: PolicySnapshot,
        idempotency_key_prefix: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            orchestrator_run_id,
            parent_node_id,
            failure_policy,
            join_mode,
            quorum_threshold,
            timeout_s,
            status: GroupStatus::Running,
            policy_snapshot,
            idempotency_key_prefix: idempotency_key_prefix.into(),
            started_at: now,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Spawn key for the member at `ordinal`, derived from the group prefix.
    pub fn member_spawn_key(&self, ordinal: u32) -> String {
        format!("{}:{}", self.idempotency_key_prefix, ordinal)
    }

    /// Wall-clock deadline check against the group's start time.
    pub fn timed_out_at(&self, now: DateTime<Utc>, effective_timeout_s: u32) -> bool {
        now - self.started_at >= chrono::Duration::seconds(i64::from(effective_timeout_s))
    }
}

/// Association row between a group and one member run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub id: Uuid,
    pub group_id: Uuid,
    pub run_id: Uuid,
    pub ordinal: u32,
    /// Read-model mirror of the member run's status; the run row stays
    /// authoritative.
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GroupMember {
    pub fn new(group_id: Uuid, run_id: Uuid, ordinal: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            group_id,
            run_id,
            ordinal,
            status: RunStatus::Queued,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_with_timeout(timeout_s: u32) -> OrchestrationGroup {
        let tenant = Uuid::new_v4();
        OrchestrationGroup::new(
            tenant,
            Uuid::new_v4(),
            Some("node_1".into()),
            FailurePolicy::BestEffort,
            JoinMode::All,
            None,
            timeout_s,
            PolicySnapshot::defaults(tenant, Uuid::new_v4()),
            "prefix",
        )
    }

    #[test]
    fn test_member_spawn_keys_are_ordinal_derived() {
        let group = group_with_timeout(60);
        assert_eq!(group.member_spawn_key(0), "prefix:0");
        assert_eq!(group.member_spawn_key(7), "prefix:7");
    }

    #[test]
    fn test_timeout_is_wall_clock_from_start() {
        let mut group = group_with_timeout(1);
        assert!(!group.timed_out_at(group.started_at, 1));

        group.started_at = Utc::now() - chrono::Duration::seconds(5);
        assert!(group.timed_out_at(Utc::now(), 1));
        assert!(!group.timed_out_at(Utc::now(), 3600));
    }

    #[test]
    fn test_only_running_is_non_terminal() {
        assert!(!GroupStatus::Running.is_terminal());
        for s in [
            GroupStatus::Completed,
            GroupStatus::CompletedWithErrors,
            GroupStatus::Failed,
            GroupStatus::TimedOut,
            GroupStatus::Cancelled,
        ] {
            assert!(s.is_terminal());
        }
    }

    #[test]
    fn test_join_mode_round_trip() {
        for m in [
            JoinMode::All,
            JoinMode::Quorum,
            JoinMode::FirstSuccess,
            JoinMode::BestEffort,
            JoinMode::FailFast,
        ] {
            assert_eq!(JoinMode::from_str(m.as_str()), Some(m));
        }
        assert_eq!(JoinMode::from_str("nope"), None);
    }
}
