//! Surface adapter: scope requirements, tenancy, and feature gating.

mod common;

use arbor::domain::models::{OrchestrationConfig, SurfaceGate};
use arbor::services::{CallerPrincipal, SpawnRunRequest};
use arbor::{KernelError, PolicyViolation};
use common::{scopes, setup, setup_with, FixtureLimits};

fn spawn_request(fx: &common::Fixture, key: &str) -> SpawnRunRequest {
    SpawnRunRequest {
        caller_run_id: fx.root_run.id,
        parent_node_id: None,
        target_agent_id: Some(fx.target.id),
        target_agent_slug: None,
        mapped_input_payload: serde_json::json!({"q": "hello"}),
        failure_policy: None,
        timeout_s: None,
        scope_subset: scopes(&["agents.execute"]),
        idempotency_key: key.to_string(),
        start_background: false,
    }
}

#[tokio::test]
async fn test_spawn_through_surface() {
    let fx = setup().await;
    let principal = CallerPrincipal::new(fx.tenant_id, scopes(&["agents.execute"]));

    let out = fx.surface.spawn_run(&principal, spawn_request(&fx, "via-surface")).await.unwrap();
    assert_eq!(out.spawned_run_ids.len(), 1);
    assert!(!out.idempotent);

    let tree = fx.surface.query_tree(&principal, fx.root_run.id).await.unwrap();
    assert_eq!(tree.nodes.len(), 2);
}

#[tokio::test]
async fn test_missing_execute_scope_is_rejected() {
    let fx = setup().await;
    let principal = CallerPrincipal::new(fx.tenant_id, scopes(&["tools.read"]));

    let err = fx.surface.spawn_run(&principal, spawn_request(&fx, "k")).await.unwrap_err();
    match &err {
        KernelError::Policy(PolicyViolation::MissingScope(scope)) => {
            assert_eq!(scope, "agents.execute");
        }
        other => panic!("expected missing-scope policy error, got {other:?}"),
    }
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn test_tenant_mismatch_is_rejected() {
    let fx = setup().await;
    let foreign = CallerPrincipal::new(uuid::Uuid::new_v4(), scopes(&["agents.execute"]));

    let err = fx.surface.spawn_run(&foreign, spawn_request(&fx, "k")).await.unwrap_err();
    assert!(matches!(err, KernelError::TenantMismatch));
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn test_wildcard_scope_bypasses_tenant_check() {
    let fx = setup().await;
    let system = CallerPrincipal::new(uuid::Uuid::new_v4(), scopes(&["*"]));

    let out = fx.surface.spawn_run(&system, spawn_request(&fx, "wild")).await.unwrap();
    assert_eq!(out.spawned_run_ids.len(), 1);
}

#[tokio::test]
async fn test_runtime_gate_blocks_kernel_entry_points() {
    let fx = setup_with(
        FixtureLimits::default(),
        OrchestrationConfig {
            runtime_primitives: SurfaceGate { enabled: false, tenant_allowlist: vec![] },
            ..OrchestrationConfig::default()
        },
    )
    .await;
    let principal = CallerPrincipal::new(fx.tenant_id, scopes(&["agents.execute"]));

    let err = fx.surface.spawn_run(&principal, spawn_request(&fx, "gated")).await.unwrap_err();
    assert!(matches!(err, KernelError::FeatureDisabled(_)));
    assert_eq!(err.status_code(), 403);

    let err = fx
        .kernel
        .cancel_subtree(fx.root_run.id, fx.root_run.id, false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::FeatureDisabled(_)));

    let err = fx
        .kernel
        .evaluate_and_replan(fx.root_run.id, fx.root_run.id)
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::FeatureDisabled(_)));
}

#[tokio::test]
async fn test_missing_target_is_a_validation_error() {
    let fx = setup().await;
    let principal = CallerPrincipal::new(fx.tenant_id, scopes(&["agents.execute"]));

    let mut request = spawn_request(&fx, "no-target");
    request.target_agent_id = None;
    request.target_agent_slug = None;

    let err = fx.surface.spawn_run(&principal, request).await.unwrap_err();
    assert!(matches!(err, KernelError::Validation(_)));
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_requests_deserialize_with_router_defaults() {
    // The wire shape the internal router binds: omitted optionals default,
    // start_background defaults on.
    let request: SpawnRunRequest = serde_json::from_value(serde_json::json!({
        "caller_run_id": uuid::Uuid::new_v4(),
        "target_agent_slug": "child-a",
        "scope_subset": ["agents.execute"],
        "idempotency_key": "k1",
    }))
    .unwrap();

    assert!(request.start_background);
    assert!(request.target_agent_id.is_none());
    assert_eq!(request.mapped_input_payload, serde_json::Value::Null);
    assert_eq!(request.target_agent_slug.as_deref(), Some("child-a"));
}
