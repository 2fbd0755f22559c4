//! Policy limits, join timeouts, and cancellation storms.

mod common;

use arbor::domain::models::{JoinMode, RunStatus};
use arbor::domain::ports::RunRepository;
use arbor::services::kernel::{GroupTargetSpec, JoinSpec, SpawnGroupSpec, SpawnRunSpec, TargetRef};
use arbor::{KernelError, PolicyViolation};
use common::{scopes, setup, setup_with_limits, FixtureLimits};

fn spawn_spec(fx: &common::Fixture, caller: uuid::Uuid, key: &str) -> SpawnRunSpec {
    SpawnRunSpec {
        caller_run_id: caller,
        parent_node_id: Some("limits".to_string()),
        target: TargetRef::Id(fx.target.id),
        input: serde_json::json!({"input": key}),
        timeout_s: Some(10),
        scope_subset: scopes(&["agents.execute"]),
        idempotency_key: key.to_string(),
        start_background: false,
    }
}

fn group_spec(fx: &common::Fixture, prefix: &str, count: usize, timeout_s: u32) -> SpawnGroupSpec {
    SpawnGroupSpec {
        caller_run_id: fx.root_run.id,
        parent_node_id: Some(prefix.to_string()),
        targets: (0..count)
            .map(|idx| GroupTargetSpec {
                target: TargetRef::Id(fx.target.id),
                input: serde_json::json!({"n": idx}),
            })
            .collect(),
        failure_policy: None,
        join_mode: JoinMode::All,
        quorum_threshold: None,
        timeout_s: Some(timeout_s),
        scope_subset: scopes(&["agents.execute"]),
        idempotency_key_prefix: prefix.to_string(),
        start_background: false,
    }
}

fn expect_policy(err: KernelError) -> PolicyViolation {
    match err {
        KernelError::Policy(violation) => violation,
        other => panic!("expected policy error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fanout_and_depth_limits_enforced() {
    let fx = setup_with_limits(FixtureLimits {
        max_depth: 1,
        max_fanout: 2,
        max_children_total: 16,
        join_timeout_s: 30,
    })
    .await;

    // Three targets against a fanout of two.
    let violation = expect_policy(
        fx.kernel.spawn_group(group_spec(&fx, "fanout_limit", 3, 30)).await.unwrap_err(),
    );
    assert!(matches!(violation, PolicyViolation::MaxFanoutExceeded { requested: 3, limit: 2 }));
    assert!(violation.to_string().contains("max_fanout exceeded"));

    // A single child fits.
    let first = fx
        .kernel
        .spawn_run(spawn_spec(&fx, fx.root_run.id, "depth-first"))
        .await
        .unwrap();
    let child_id = first.spawned_run_ids[0];

    // The child may not spawn at depth 2 > 1.
    let violation = expect_policy(
        fx.kernel.spawn_run(spawn_spec(&fx, child_id, "depth-second")).await.unwrap_err(),
    );
    assert!(matches!(violation, PolicyViolation::MaxDepthExceeded { next: 2, limit: 1 }));
    assert!(violation.to_string().contains("max_depth exceeded"));
}

#[tokio::test]
async fn test_whole_subtree_total_limit() {
    let fx = setup_with_limits(FixtureLimits {
        max_depth: 4,
        max_fanout: 2,
        max_children_total: 2,
        join_timeout_s: 30,
    })
    .await;

    let first = fx.kernel.spawn_run(spawn_spec(&fx, fx.root_run.id, "c1")).await.unwrap();
    let child_id = first.spawned_run_ids[0];
    fx.kernel.spawn_run(spawn_spec(&fx, child_id, "c2")).await.unwrap();

    // Two descendants exist under the root; a third exceeds the subtree cap.
    let violation = expect_policy(
        fx.kernel.spawn_run(spawn_spec(&fx, child_id, "c3")).await.unwrap_err(),
    );
    assert!(matches!(violation, PolicyViolation::MaxChildrenTotalExceeded { total: 3, limit: 2 }));
}

#[tokio::test]
async fn test_replays_succeed_even_after_limits_fill_up() {
    let fx = setup_with_limits(FixtureLimits {
        max_depth: 2,
        max_fanout: 1,
        max_children_total: 16,
        join_timeout_s: 30,
    })
    .await;

    let first = fx.kernel.spawn_run(spawn_spec(&fx, fx.root_run.id, "only")).await.unwrap();
    assert!(!first.idempotent);

    // The single fanout slot is used up, but a replay of the same key must
    // still return the existing child rather than a policy error.
    let replay = fx.kernel.spawn_run(spawn_spec(&fx, fx.root_run.id, "only")).await.unwrap();
    assert!(replay.idempotent);
    assert_eq!(replay.spawned_run_ids, first.spawned_run_ids);

    // A different key is a genuine new spawn and hits the limit.
    let violation = expect_policy(
        fx.kernel.spawn_run(spawn_spec(&fx, fx.root_run.id, "fresh")).await.unwrap_err(),
    );
    assert!(matches!(violation, PolicyViolation::MaxFanoutExceededForParent { .. }));
}

#[tokio::test]
async fn test_join_timeout_propagates_cancellation() {
    let fx = setup().await;

    let group = fx.kernel.spawn_group(group_spec(&fx, "timeout_group", 2, 1)).await.unwrap();
    for run_id in &group.spawned_run_ids {
        fx.set_status(*run_id, RunStatus::Running).await;
    }
    fx.backdate_group(group.orchestration_group_id, 5).await;

    let joined = fx
        .kernel
        .join(JoinSpec {
            caller_run_id: fx.root_run.id,
            orchestration_group_id: group.orchestration_group_id,
            mode: Some(JoinMode::BestEffort),
            quorum_threshold: None,
            timeout_s: Some(1),
        })
        .await
        .unwrap();

    assert!(joined.complete);
    assert_eq!(joined.status.as_str(), "timed_out");
    assert_eq!(joined.cancellation_propagated.count, 2);

    for run_id in &group.spawned_run_ids {
        assert_eq!(fx.run_status(*run_id).await, RunStatus::Cancelled);
    }

    // Terminal groups replay the stored decision with no further effects.
    let again = fx
        .kernel
        .join(JoinSpec {
            caller_run_id: fx.root_run.id,
            orchestration_group_id: group.orchestration_group_id,
            mode: None,
            quorum_threshold: None,
            timeout_s: None,
        })
        .await
        .unwrap();
    assert!(again.complete);
    assert_eq!(again.status.as_str(), "timed_out");
    assert_eq!(again.cancellation_propagated.count, 0);
}

#[tokio::test]
async fn test_cancel_subtree_is_idempotent_under_storms() {
    let fx = setup().await;

    let group = fx.kernel.spawn_group(group_spec(&fx, "cancel_storm", 3, 10)).await.unwrap();
    for run_id in &group.spawned_run_ids {
        fx.set_status(*run_id, RunStatus::Running).await;
    }

    let first = fx
        .kernel
        .cancel_subtree(fx.root_run.id, fx.root_run.id, false, Some("storm-test"))
        .await
        .unwrap();
    assert!(first.cancelled_count >= 3);

    let second = fx
        .kernel
        .cancel_subtree(fx.root_run.id, fx.root_run.id, false, Some("storm-test"))
        .await
        .unwrap();
    assert_eq!(second.cancelled_count, 0);

    // The root was excluded and is untouched.
    assert_eq!(fx.run_status(fx.root_run.id).await, RunStatus::Running);
}

#[tokio::test]
async fn test_cancel_subtree_skips_terminal_runs_and_records_reason() {
    let fx = setup().await;

    let group = fx.kernel.spawn_group(group_spec(&fx, "partial", 2, 10)).await.unwrap();
    let done = group.spawned_run_ids[0];
    let live = group.spawned_run_ids[1];
    fx.set_status(done, RunStatus::Completed).await;
    fx.set_status(live, RunStatus::Running).await;

    let out = fx
        .kernel
        .cancel_subtree(fx.root_run.id, fx.root_run.id, false, Some("cleanup"))
        .await
        .unwrap();
    assert_eq!(out.cancelled_count, 1);

    assert_eq!(fx.run_status(done).await, RunStatus::Completed);
    let cancelled = fx.runs.get(live).await.unwrap().unwrap();
    assert_eq!(cancelled.status, RunStatus::Cancelled);
    assert_eq!(cancelled.output.unwrap()["cancel_reason"], serde_json::json!("cleanup"));
}

#[tokio::test]
async fn test_evaluate_and_replan_counts_children() {
    let fx = setup().await;

    let group = fx.kernel.spawn_group(group_spec(&fx, "replan", 3, 10)).await.unwrap();
    fx.set_status(group.spawned_run_ids[0], RunStatus::Completed).await;
    fx.set_status(group.spawned_run_ids[1], RunStatus::Failed).await;
    fx.set_status(group.spawned_run_ids[2], RunStatus::Running).await;

    let out = fx.kernel.evaluate_and_replan(fx.root_run.id, fx.root_run.id).await.unwrap();
    assert_eq!(out.completed_count, 1);
    assert_eq!(out.failed_count, 1);
    assert_eq!(out.running_count, 1);
    assert!(out.needs_replan);

    // Read-only: statuses are untouched.
    assert_eq!(fx.run_status(group.spawned_run_ids[2]).await, RunStatus::Running);
}

#[tokio::test]
async fn test_query_tree_returns_bfs_lineage() {
    let fx = setup().await;

    let first = fx.kernel.spawn_run(spawn_spec(&fx, fx.root_run.id, "t1")).await.unwrap();
    let child = first.spawned_run_ids[0];
    fx.kernel.spawn_run(spawn_spec(&fx, child, "t2")).await.unwrap();

    let tree = fx.kernel.query_tree(fx.root_run.id).await.unwrap();
    assert_eq!(tree.nodes.len(), 3);
    assert_eq!(tree.nodes[0].run_id, fx.root_run.id);
    assert_eq!(tree.nodes[0].depth, 0);
    assert_eq!(tree.nodes[1].parent_run_id, Some(fx.root_run.id));
    assert_eq!(tree.nodes[2].depth, 2);
}

#[tokio::test]
async fn test_cross_tenant_cancellation_is_rejected() {
    let fx = setup().await;
    let other = setup().await;

    let err = fx
        .kernel
        .cancel_subtree(fx.root_run.id, other.root_run.id, true, None)
        .await
        .unwrap_err();
    // The other tenant's run lives in a different store here, so the kernel
    // reports it missing; same-store cross-tenant runs map to TenantMismatch.
    assert!(matches!(err, KernelError::RunNotFound(_)));

    // Same store, different tenant.
    let foreign = arbor::domain::models::Run::root(uuid::Uuid::new_v4(), fx.target.id);
    fx.runs.create(&foreign).await.unwrap();
    let err = fx
        .kernel
        .cancel_subtree(fx.root_run.id, foreign.id, true, None)
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::TenantMismatch));
}
