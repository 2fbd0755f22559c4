//! Join engine: completion rules over a sibling group.
//!
//! The decision logic is a pure function over the ordinal-ordered member
//! statuses; the async wrapper applies timeouts, propagates cancellation,
//! and drives the group row to its terminal status exactly once.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{GroupStatus, JoinMode, RunStatus};

use super::{JoinSpec, OrchestrationKernel};

/// Status reported by a join call. Mirrors the group statuses plus
/// `pending`, the edge handle graphs use for a not-yet-decided join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
    TimedOut,
    Cancelled,
    Pending,
}

impl JoinStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::Pending => "pending",
        }
    }
}

impl From<GroupStatus> for JoinStatus {
    fn from(status: GroupStatus) -> Self {
        match status {
            GroupStatus::Running => Self::Running,
            GroupStatus::Completed => Self::Completed,
            GroupStatus::CompletedWithErrors => Self::CompletedWithErrors,
            GroupStatus::Failed => Self::Failed,
            GroupStatus::TimedOut => Self::TimedOut,
            GroupStatus::Cancelled => Self::Cancelled,
        }
    }
}

/// Per-member slice of a join response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberSummary {
    pub run_id: uuid::Uuid,
    pub ordinal: u32,
    pub status: RunStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationPropagated {
    pub count: u64,
}

/// Join response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinOutcome {
    pub complete: bool,
    pub status: JoinStatus,
    pub mode: JoinMode,
    pub results: Vec<MemberSummary>,
    pub cancellation_propagated: CancellationPropagated,
}

/// Outcome of evaluating a join mode over member statuses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinDecision {
    pub complete: bool,
    pub status: GroupStatus,
    /// Indexes (into the ordinal-ordered status slice) of members that must
    /// be cancelled as a side effect of the decision.
    pub cancel: Vec<usize>,
}

impl JoinDecision {
    fn incomplete() -> Self {
        Self { complete: false, status: GroupStatus::Running, cancel: Vec::new() }
    }

    fn done(status: GroupStatus, cancel: Vec<usize>) -> Self {
        Self { complete: true, status, cancel }
    }
}

/// Evaluate a join mode over the member statuses, ordered by ordinal.
/// Members are scanned in that order, so simultaneous events tie-break
/// toward the lower ordinal.
pub fn evaluate_join(mode: JoinMode, quorum_threshold: Option<u32>, statuses: &[RunStatus]) -> JoinDecision {
    let total = statuses.len();
    let completed = statuses.iter().filter(|s| **s == RunStatus::Completed).count();
    let failed = statuses.iter().filter(|s| **s == RunStatus::Failed).count();
    let running = statuses.iter().filter(|s| s.is_active()).count();
    let active_indexes = || -> Vec<usize> {
        statuses
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_active())
            .map(|(idx, _)| idx)
            .collect()
    };

    // Terminal mix once nothing is active: all succeeded, some succeeded, or
    // none did. Shared by the modes that wait everyone out.
    let settled_status = || {
        if completed == total {
            GroupStatus::Completed
        } else if completed > 0 {
            GroupStatus::CompletedWithErrors
        } else {
            GroupStatus::Failed
        }
    };

    match mode {
        JoinMode::All | JoinMode::BestEffort => {
            if running > 0 {
                JoinDecision::incomplete()
            } else {
                JoinDecision::done(settled_status(), Vec::new())
            }
        }
        JoinMode::FailFast => {
            if failed > 0 {
                JoinDecision::done(GroupStatus::Failed, active_indexes())
            } else if running > 0 {
                JoinDecision::incomplete()
            } else {
                JoinDecision::done(settled_status(), Vec::new())
            }
        }
        JoinMode::FirstSuccess => {
            if completed > 0 {
                JoinDecision::done(GroupStatus::Completed, active_indexes())
            } else if running > 0 {
                JoinDecision::incomplete()
            } else {
                JoinDecision::done(GroupStatus::Failed, Vec::new())
            }
        }
        JoinMode::Quorum => {
            let threshold = quorum_threshold.unwrap_or(1) as usize;
            if completed >= threshold {
                JoinDecision::done(GroupStatus::Completed, active_indexes())
            } else if completed + running < threshold {
                // Quorum can no longer be reached.
                JoinDecision::done(GroupStatus::Failed, active_indexes())
            } else {
                JoinDecision::incomplete()
            }
        }
    }
}

impl OrchestrationKernel {
    /// Evaluate a group's completion rule. Once the group is terminal the
    /// call is a read: the same status comes back and nothing is cancelled.
    pub async fn join(&self, spec: JoinSpec) -> KernelResult<JoinOutcome> {
        let caller = self.require_run(spec.caller_run_id).await?;
        self.assert_runtime_enabled(caller.tenant_id)?;

        let _guard = self.locks.acquire(spec.orchestration_group_id).await;

        let group = self.require_group(spec.orchestration_group_id).await?;
        if group.tenant_id != caller.tenant_id {
            return Err(KernelError::TenantMismatch);
        }

        let mode = spec.mode.unwrap_or(group.join_mode);
        let member_runs = self.groups.member_runs(group.id).await?;
        let total = u32::try_from(member_runs.len())
            .map_err(|_| KernelError::Validation("group too large".to_string()))?;

        // Terminal groups are immutable; replay the stored decision.
        if group.status.is_terminal() {
            let results = member_runs
                .iter()
                .map(|(member, run)| MemberSummary {
                    run_id: run.id,
                    ordinal: member.ordinal,
                    status: run.status,
                })
                .collect();
            return Ok(JoinOutcome {
                complete: true,
                status: group.status.into(),
                mode: group.join_mode,
                results,
                cancellation_propagated: CancellationPropagated { count: 0 },
            });
        }

        let quorum_threshold = spec.quorum_threshold.or(group.quorum_threshold);
        if mode == JoinMode::Quorum {
            match quorum_threshold {
                Some(k) if k >= 1 && k <= total => {}
                _ => {
                    return Err(KernelError::Validation(
                        "quorum mode requires a positive quorum_threshold within the member count"
                            .to_string(),
                    ))
                }
            }
        }
        let timeout_s = spec.timeout_s.unwrap_or(group.timeout_s);

        let mut statuses: Vec<RunStatus> = member_runs.iter().map(|(_, run)| run.status).collect();

        // Wall-clock timeout beats every mode: unfinished members are
        // cancelled and the group is closed as timed out.
        if group.timed_out_at(Utc::now(), timeout_s) {
            let decision = JoinDecision::done(
                GroupStatus::TimedOut,
                statuses
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.is_active())
                    .map(|(idx, _)| idx)
                    .collect(),
            );
            return self
                .finish_join(&group, mode, decision, &member_runs, &mut statuses)
                .await;
        }

        let decision = evaluate_join(mode, quorum_threshold, &statuses);

        if !decision.complete {
            // Mirror current statuses onto the member rows before reporting.
            for (_, run) in &member_runs {
                self.groups.update_member_status(group.id, run.id, run.status).await?;
            }
            let results = member_runs
                .iter()
                .map(|(member, run)| MemberSummary {
                    run_id: run.id,
                    ordinal: member.ordinal,
                    status: run.status,
                })
                .collect();
            return Ok(JoinOutcome {
                complete: false,
                status: JoinStatus::Running,
                mode,
                results,
                cancellation_propagated: CancellationPropagated { count: 0 },
            });
        }

        self.finish_join(&group, mode, decision, &member_runs, &mut statuses).await
    }

    /// Apply a completing decision: cancel the decided-against members'
    /// subtrees, mirror member statuses, and close the group.
    async fn finish_join(
        &self,
        group: &crate::domain::models::OrchestrationGroup,
        mode: JoinMode,
        decision: JoinDecision,
        member_runs: &[(crate::domain::models::GroupMember, crate::domain::models::Run)],
        statuses: &mut [RunStatus],
    ) -> KernelResult<JoinOutcome> {
        let mut cancelled_total: u64 = 0;
        for idx in &decision.cancel {
            let (_, run) = &member_runs[*idx];
            cancelled_total += self
                .cancel_subtree_unlocked(run.id, true, Some("cancelled by group join decision"))
                .await?;
            statuses[*idx] = RunStatus::Cancelled;
        }

        for (position, (_, run)) in member_runs.iter().enumerate() {
            self.groups
                .update_member_status(group.id, run.id, statuses[position])
                .await?;
        }

        self.groups.complete(group.id, decision.status).await?;
        info!(
            group_id = %group.id,
            status = decision.status.as_str(),
            mode = mode.as_str(),
            cancelled = cancelled_total,
            "orchestration group joined"
        );

        let results = member_runs
            .iter()
            .enumerate()
            .map(|(position, (member, run))| MemberSummary {
                run_id: run.id,
                ordinal: member.ordinal,
                status: statuses[position],
            })
            .collect();

        Ok(JoinOutcome {
            complete: true,
            status: decision.status.into(),
            mode,
            results,
            cancellation_propagated: CancellationPropagated { count: cancelled_total },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::RunStatus::{Cancelled, Completed, Failed, Queued, Running};

    #[test]
    fn test_all_waits_for_every_member() {
        let d = evaluate_join(JoinMode::All, None, &[Completed, Running]);
        assert!(!d.complete);

        let d = evaluate_join(JoinMode::All, None, &[Completed, Completed]);
        assert_eq!(d.status, GroupStatus::Completed);
        assert!(d.cancel.is_empty());

        let d = evaluate_join(JoinMode::All, None, &[Completed, Failed]);
        assert_eq!(d.status, GroupStatus::CompletedWithErrors);

        let d = evaluate_join(JoinMode::All, None, &[Failed, Cancelled]);
        assert_eq!(d.status, GroupStatus::Failed);
    }

    #[test]
    fn test_best_effort_all_failures_is_failed() {
        // Named policy decision: zero successes settle as failed, not
        // completed_with_errors.
        let d = evaluate_join(JoinMode::BestEffort, None, &[Failed, Failed]);
        assert!(d.complete);
        assert_eq!(d.status, GroupStatus::Failed);

        let d = evaluate_join(JoinMode::BestEffort, None, &[Completed, Failed]);
        assert_eq!(d.status, GroupStatus::CompletedWithErrors);
    }

    #[test]
    fn test_fail_fast_triggers_on_first_failure() {
        let d = evaluate_join(JoinMode::FailFast, None, &[Failed, Running, Queued]);
        assert!(d.complete);
        assert_eq!(d.status, GroupStatus::Failed);
        assert_eq!(d.cancel, vec![1, 2]);

        // Without a failure it behaves like `all`.
        let d = evaluate_join(JoinMode::FailFast, None, &[Completed, Running]);
        assert!(!d.complete);
        let d = evaluate_join(JoinMode::FailFast, None, &[Completed, Completed]);
        assert_eq!(d.status, GroupStatus::Completed);
    }

    #[test]
    fn test_first_success_cancels_the_rest() {
        let d = evaluate_join(JoinMode::FirstSuccess, None, &[Completed, Running]);
        assert!(d.complete);
        assert_eq!(d.status, GroupStatus::Completed);
        assert_eq!(d.cancel, vec![1]);

        let d = evaluate_join(JoinMode::FirstSuccess, None, &[Failed, Running]);
        assert!(!d.complete);

        let d = evaluate_join(JoinMode::FirstSuccess, None, &[Failed, Failed]);
        assert!(d.complete);
        assert_eq!(d.status, GroupStatus::Failed);
    }

    #[test]
    fn test_quorum_reached_and_impossible() {
        let d = evaluate_join(JoinMode::Quorum, Some(2), &[Completed, Failed, Running]);
        assert!(!d.complete);
        assert_eq!(d.status, GroupStatus::Running);

        let d = evaluate_join(JoinMode::Quorum, Some(2), &[Completed, Failed, Failed]);
        assert!(d.complete);
        assert_eq!(d.status, GroupStatus::Failed);

        let d = evaluate_join(JoinMode::Quorum, Some(2), &[Completed, Completed, Running]);
        assert!(d.complete);
        assert_eq!(d.status, GroupStatus::Completed);
        assert_eq!(d.cancel, vec![2]);
    }

    #[test]
    fn test_decisions_never_complete_as_running() {
        for mode in [
            JoinMode::All,
            JoinMode::BestEffort,
            JoinMode::FailFast,
            JoinMode::FirstSuccess,
        ] {
            let d = evaluate_join(mode, None, &[Running, Running]);
            assert!(!d.complete);
            assert_eq!(d.status, GroupStatus::Running);
        }
    }
}
