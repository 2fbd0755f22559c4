//! Kernel services: business logic over the domain ports.

pub mod graph_validator;
pub mod identity;
pub mod kernel;
pub mod locks;
pub mod policy;
pub mod surface;

pub use graph_validator::{GraphValidator, ValidationIssue};
pub use identity::WorkloadIdentityService;
pub use kernel::{
    evaluate_join, CancelOutcome, CancellationPropagated, GroupSpawnOutcome, GroupTargetSpec,
    JoinDecision, JoinOutcome, JoinSpec, JoinStatus, MemberSummary, OrchestrationKernel,
    ReplanOutcome, RunTree, SpawnGroupSpec, SpawnOutcome, SpawnRunSpec, TargetRef, TreeNode,
};
pub use locks::KeyedLocks;
pub use policy::PolicyService;
pub use surface::{
    CallerPrincipal, CancelSubtreeRequest, EvaluateAndReplanRequest, JoinRequest,
    OrchestrationSurface, SpawnGroupRequest, SpawnGroupTargetRequest, SpawnRunRequest,
};
