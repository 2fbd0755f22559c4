//! Domain models
//!
//! Pure domain entities with business logic and validation rules.
//! These models are framework-agnostic and contain no infrastructure concerns.

pub mod agent;
pub mod config;
pub mod graph;
pub mod group;
pub mod identity;
pub mod policy;
pub mod run;

pub use agent::{Agent, AgentStatus};
pub use config::{Config, DatabaseConfig, LoggingConfig, OrchestrationConfig, SurfaceGate};
pub use graph::{
    AgentGraph, GraphEdge, GraphNode, JoinNodeConfig, SpawnGroupNodeConfig, SpawnGroupTarget,
    SpawnRunNodeConfig, ORCHESTRATION_NODE_TYPES, SPEC_VERSION_V2,
};
pub use group::{FailurePolicy, GroupMember, GroupStatus, JoinMode, OrchestrationGroup};
pub use identity::{
    DelegationGrant, GrantStatus, PrincipalType, ScopePolicyStatus, ScopeSet, TokenJti,
    WorkloadPrincipal, WorkloadScopePolicy, SCOPE_AGENTS_EXECUTE, SCOPE_WILDCARD,
};
pub use policy::{
    AllowlistEntry, OrchestratorPolicy, PolicySnapshot, DEFAULT_JOIN_TIMEOUT_S, DEFAULT_MAX_CHILDREN_TOTAL,
    DEFAULT_MAX_DEPTH, DEFAULT_MAX_FANOUT,
};
pub use run::{Run, RunStatus};
