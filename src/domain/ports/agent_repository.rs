//! Agent repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::KernelResult;
use crate::domain::models::Agent;

/// Repository interface for agent definitions (spawn targets).
#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Create a new agent.
    async fn create(&self, agent: &Agent) -> KernelResult<()>;

    /// Get an agent by ID.
    async fn get(&self, id: Uuid) -> KernelResult<Option<Agent>>;

    /// Find an agent by slug within a tenant.
    async fn find_by_slug(&self, tenant_id: Uuid, slug: &str) -> KernelResult<Option<Agent>>;
}
