//! Workload identity repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::KernelResult;
use crate::domain::models::{
    DelegationGrant, GrantStatus, TokenJti, WorkloadPrincipal, WorkloadScopePolicy,
};

/// Repository interface for principals, scope policies, delegation grants,
/// and the token JTI registry.
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    async fn create_principal(&self, principal: &WorkloadPrincipal) -> KernelResult<()>;

    async fn get_principal(&self, id: Uuid) -> KernelResult<Option<WorkloadPrincipal>>;

    async fn find_principal(&self, tenant_id: Uuid, slug: &str) -> KernelResult<Option<WorkloadPrincipal>>;

    async fn create_scope_policy(&self, policy: &WorkloadScopePolicy) -> KernelResult<()>;

    /// Highest-version scope policy for a principal.
    async fn latest_scope_policy(&self, principal_id: Uuid) -> KernelResult<Option<WorkloadScopePolicy>>;

    /// Persist an updated scope policy row (approval bumps its version).
    async fn update_scope_policy(&self, policy: &WorkloadScopePolicy) -> KernelResult<()>;

    async fn create_grant(&self, grant: &DelegationGrant) -> KernelResult<()>;

    async fn get_grant(&self, id: Uuid) -> KernelResult<Option<DelegationGrant>>;

    async fn update_grant_status(&self, id: Uuid, status: GrantStatus) -> KernelResult<()>;

    async fn register_jti(&self, entry: &TokenJti) -> KernelResult<()>;

    async fn get_jti(&self, jti: &str) -> KernelResult<Option<TokenJti>>;

    /// Revoke every registry row of a grant. Returns how many were revoked.
    async fn revoke_jtis_for_grant(&self, grant_id: Uuid, reason: &str, at: DateTime<Utc>) -> KernelResult<u64>;

    /// Delete registry rows whose expiry is in the past. Returns how many
    /// rows were swept.
    async fn sweep_expired_jtis(&self, now: DateTime<Utc>) -> KernelResult<u64>;
}
