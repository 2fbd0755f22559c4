//! Cancellation, replan evaluation, and subtree queries.
//!
//! Cancellation is advisory: the kernel flips persisted statuses and the
//! interpreter observes them at its next checkpoint. Terminal runs are
//! never touched, which is what makes cancellation storms idempotent.

use std::collections::VecDeque;

use tracing::info;
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{Run, RunStatus};

use super::{CancelOutcome, OrchestrationKernel, ReplanOutcome, RunTree, TreeNode};

impl OrchestrationKernel {
    /// Cancel a run subtree. BFS from `run_id` over the parent index; every
    /// still-active run in the set transitions to cancelled with the reason
    /// recorded. Returns how many runs were transitioned, so a repeat call
    /// over an unchanged subtree returns zero.
    pub async fn cancel_subtree(
        &self,
        caller_run_id: Uuid,
        run_id: Uuid,
        include_root: bool,
        reason: Option<&str>,
    ) -> KernelResult<CancelOutcome> {
        let caller = self.require_run(caller_run_id).await?;
        self.assert_runtime_enabled(caller.tenant_id)?;

        let target = self.require_run(run_id).await?;
        if target.tenant_id != caller.tenant_id {
            return Err(KernelError::TenantMismatch);
        }

        // Serialize concurrent cancellations of the same tree.
        let _guard = self.locks.acquire(target.root_run_id).await;

        let cancelled_count = self.cancel_subtree_unlocked(run_id, include_root, reason).await?;
        info!(
            caller_run_id = %caller_run_id,
            run_id = %run_id,
            include_root = include_root,
            cancelled_count = cancelled_count,
            "subtree cancellation applied"
        );
        Ok(CancelOutcome { cancelled_count })
    }

    /// Cancellation body shared with the join engine, which is already
    /// serialized on its group and must not take a second lock.
    pub(crate) async fn cancel_subtree_unlocked(
        &self,
        run_id: Uuid,
        include_root: bool,
        reason: Option<&str>,
    ) -> KernelResult<u64> {
        let subtree = self.collect_subtree(run_id).await?;
        let mut cancelled: u64 = 0;

        for run in &subtree {
            if run.id == run_id && !include_root {
                continue;
            }
            if self.runs.cancel_if_active(run.id, reason).await? {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    /// Read-only summary over the direct children of `run_id`. The caller's
    /// graph decides whether to spawn a replacement plan; the kernel never
    /// mutates anything here.
    pub async fn evaluate_and_replan(&self, caller_run_id: Uuid, run_id: Uuid) -> KernelResult<ReplanOutcome> {
        let caller = self.require_run(caller_run_id).await?;
        self.assert_runtime_enabled(caller.tenant_id)?;

        let target = self.require_run(run_id).await?;
        if target.tenant_id != caller.tenant_id {
            return Err(KernelError::TenantMismatch);
        }

        let children = self.runs.list_children(run_id).await?;
        let mut failed: u64 = 0;
        let mut completed: u64 = 0;
        let mut running: u64 = 0;
        for child in &children {
            match child.status {
                RunStatus::Completed => completed += 1,
                RunStatus::Failed | RunStatus::Cancelled | RunStatus::TimedOut => failed += 1,
                RunStatus::Queued | RunStatus::Running | RunStatus::Paused => running += 1,
            }
        }

        Ok(ReplanOutcome {
            failed_count: failed,
            completed_count: completed,
            running_count: running,
            needs_replan: failed > 0,
        })
    }

    /// The subtree of `run_id` in BFS order, with lineage and status.
    pub async fn query_tree(&self, run_id: Uuid) -> KernelResult<RunTree> {
        let root = self.require_run(run_id).await?;
        let nodes = self
            .collect_subtree(root.id)
            .await?
            .into_iter()
            .map(|run| TreeNode {
                run_id: run.id,
                parent_run_id: run.parent_run_id,
                depth: run.depth,
                status: run.status,
            })
            .collect();
        Ok(RunTree { nodes })
    }

    /// BFS from `run_id` via the parent index, children in creation order.
    pub(crate) async fn collect_subtree(&self, run_id: Uuid) -> KernelResult<Vec<Run>> {
        let root = self.require_run(run_id).await?;
        let mut order = Vec::new();
        let mut queue = VecDeque::from([root]);

        while let Some(current) = queue.pop_front() {
            let children = self.runs.list_children(current.id).await?;
            queue.extend(children);
            order.push(current);
        }
        Ok(order)
    }
}
