//! Orchestrator policy repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::KernelResult;
use crate::domain::models::{AllowlistEntry, OrchestratorPolicy};

/// Repository interface for orchestrator policies and target allowlists.
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// Active policy row for (tenant, orchestrator agent), if any.
    async fn find(&self, tenant_id: Uuid, orchestrator_agent_id: Uuid) -> KernelResult<Option<OrchestratorPolicy>>;

    /// Insert or replace the policy row for its (tenant, orchestrator) pair.
    async fn upsert(&self, policy: &OrchestratorPolicy) -> KernelResult<()>;

    /// Active allowlist entries for (tenant, orchestrator agent).
    async fn allowlist(&self, tenant_id: Uuid, orchestrator_agent_id: Uuid) -> KernelResult<Vec<AllowlistEntry>>;

    /// Add one allowlist entry.
    async fn add_allowlist_entry(&self, entry: &AllowlistEntry) -> KernelResult<()>;
}
