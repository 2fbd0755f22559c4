//! Run domain model.
//!
//! A run is a single execution of an agent graph. Runs form a tree:
//! every run records its parent, its root, and its depth, and spawned
//! children carry a spawn key that is unique within their parent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a run in the execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is persisted but not yet picked up by the interpreter
    Queued,
    /// Run is currently executing
    Running,
    /// Run is suspended awaiting external input
    Paused,
    /// Run finished successfully
    Completed,
    /// Run failed during execution
    Failed,
    /// Run was cancelled
    Cancelled,
    /// Run exceeded its execution window
    TimedOut,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Queued
    }
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "timed_out" => Some(Self::TimedOut),
            _ => None,
        }
    }

    /// Check if this is a terminal state. Terminal statuses are monotone:
    /// once reached, the run never transitions again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut)
    }

    /// Check if this is an active (non-terminal) state.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [RunStatus] {
        match self {
            Self::Queued => &[Self::Running, Self::Cancelled, Self::Failed, Self::TimedOut],
            Self::Running => &[
                Self::Paused,
                Self::Completed,
                Self::Failed,
                Self::Cancelled,
                Self::TimedOut,
            ],
            Self::Paused => &[Self::Running, Self::Cancelled, Self::Failed, Self::TimedOut],
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// A single execution of an agent graph, with lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier
    pub id: Uuid,
    /// Owning tenant
    pub tenant_id: Uuid,
    /// Agent whose graph this run executes
    pub agent_id: Uuid,
    /// Human user on whose behalf the run tree operates
    pub initiator_user_id: Option<Uuid>,
    /// Workload principal acting for this run
    pub workload_principal_id: Option<Uuid>,
    /// Delegation grant backing this run's scopes
    pub delegation_grant_id: Option<Uuid>,
    /// Current status
    pub status: RunStatus,
    /// Root of this run's tree; equals `id` for roots
    pub root_run_id: Uuid,
    /// Parent run, None for roots
    pub parent_run_id: Option<Uuid>,
    /// Graph node in the parent that spawned this run
    pub parent_node_id: Option<String>,
    /// Tree depth, root = 0
    pub depth: u32,
    /// Idempotency key; unique within the parent when set
    pub spawn_key: Option<String>,
    /// Sibling group this run belongs to, if spawned via spawn_group
    pub orchestration_group_id: Option<Uuid>,
    /// Execution window hint persisted for the interpreter; not enforced here
    pub timeout_s: Option<u32>,
    /// Input parameters
    pub input: serde_json::Value,
    /// Output payload and metadata
    pub output: Option<serde_json::Value>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When execution started
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal status was reached
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Create a new root run. Roots are their own tree root at depth 0.
    pub fn root(tenant_id: Uuid, agent_id: Uuid) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            tenant_id,
            agent_id,
            initiator_user_id: None,
            workload_principal_id: None,
            delegation_grant_id: None,
            status: RunStatus::default(),
            root_run_id: id,
            parent_run_id: None,
            parent_node_id: None,
            depth: 0,
            spawn_key: None,
            orchestration_group_id: None,
            timeout_s: None,
            input: serde_json::Value::Object(serde_json::Map::new()),
            output: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Create a child run spawned from `parent`. Lineage is derived from the
    /// parent: shared root, depth + 1.
    pub fn child_of(parent: &Run, agent_id: Uuid, spawn_key: impl Into<String>) -> Self {
        let mut run = Self::root(parent.tenant_id, agent_id);
        run.root_run_id = parent.root_run_id;
        run.parent_run_id = Some(parent.id);
        run.depth = parent.depth + 1;
        run.spawn_key = Some(spawn_key.into());
        run.initiator_user_id = parent.initiator_user_id;
        run
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_parent_node(mut self, node_id: Option<String>) -> Self {
        self.parent_node_id = node_id;
        self
    }

    pub fn with_group(mut self, group_id: Uuid) -> Self {
        self.orchestration_group_id = Some(group_id);
        self
    }

    pub fn with_timeout(mut self, timeout_s: Option<u32>) -> Self {
        self.timeout_s = timeout_s;
        self
    }

    pub fn with_identity(
        mut self,
        initiator_user_id: Option<Uuid>,
        workload_principal_id: Uuid,
        delegation_grant_id: Uuid,
    ) -> Self {
        self.initiator_user_id = initiator_user_id;
        self.workload_principal_id = Some(workload_principal_id);
        self.delegation_grant_id = Some(delegation_grant_id);
        self
    }

    /// Check if can transition to given status.
    pub fn can_transition_to(&self, new_status: RunStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Transition to new status, updating timestamps.
    pub fn transition_to(&mut self, new_status: RunStatus) -> Result<(), String> {
        if !self.can_transition_to(new_status) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.status.as_str(),
                new_status.as_str()
            ));
        }

        self.status = new_status;
        match new_status {
            RunStatus::Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
            }
            s if s.is_terminal() => self.completed_at = Some(Utc::now()),
            _ => {}
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
