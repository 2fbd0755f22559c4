//! Arbor - orchestration kernel for multi-agent run trees
//!
//! A tenant-scoped kernel that:
//! - Spawns child agent runs from a parent run (single + group), idempotently
//! - Enforces per-orchestrator policy: depth, fanout, totals, allowlists
//! - Backs every spawned run with a workload principal and a scoped,
//!   attenuating delegation grant
//! - Joins sibling groups under five completion rules
//! - Propagates cancellation through run subtrees
//! - Statically validates orchestration nodes in v2 agent graphs

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::errors::{KernelError, KernelResult, PolicyViolation};
pub use services::kernel::OrchestrationKernel;
pub use services::surface::OrchestrationSurface;
