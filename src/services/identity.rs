//! Workload identity and delegation service.
//!
//! Owns the lifecycle of workload principals, their scope policies, and the
//! delegation grants that back runs. Scope inheritance is set intersection
//! with explicit rejection; nothing here ever widens a scope set.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult, PolicyViolation};
use crate::domain::models::{
    DelegationGrant, GrantStatus, PolicySnapshot, PrincipalType, ScopeSet, TokenJti,
    WorkloadPrincipal, WorkloadScopePolicy,
};
use crate::domain::ports::IdentityRepository;

/// Default lifetime of a delegation grant.
pub fn default_grant_ttl() -> Duration {
    Duration::hours(1)
}

#[derive(Clone)]
pub struct WorkloadIdentityService {
    repo: Arc<dyn IdentityRepository>,
}

impl WorkloadIdentityService {
    pub fn new(repo: Arc<dyn IdentityRepository>) -> Self {
        Self { repo }
    }

    /// Create-or-get a principal by (tenant, slug). On creation a scope
    /// policy is opened for the requested scopes: SYSTEM principals may be
    /// auto-approved, everything else stays pending until an explicit
    /// approval bumps the policy version.
    #[allow(clippy::too_many_arguments)]
    pub async fn ensure_principal(
        &self,
        tenant_id: Uuid,
        slug: &str,
        name: &str,
        principal_type: PrincipalType,
        created_by: Option<Uuid>,
        requested_scopes: &ScopeSet,
        auto_approve_system: bool,
    ) -> KernelResult<WorkloadPrincipal> {
        if let Some(existing) = self.repo.find_principal(tenant_id, slug).await? {
            return Ok(existing);
        }

        let principal = WorkloadPrincipal::new(tenant_id, slug, name, principal_type)
            .with_created_by(created_by);
        self.repo.create_principal(&principal).await?;

        let mut policy = WorkloadScopePolicy::pending(principal.id, requested_scopes.clone());
        if principal_type == PrincipalType::System && auto_approve_system {
            policy.approve(requested_scopes.clone(), created_by);
        }
        self.repo.create_scope_policy(&policy).await?;

        info!(
            principal_id = %principal.id,
            tenant_id = %tenant_id,
            slug = slug,
            policy_status = policy.status.as_str(),
            "workload principal created"
        );
        Ok(principal)
    }

    /// Approve scopes for a principal, bumping the policy version.
    pub async fn approve_scopes(
        &self,
        principal_id: Uuid,
        scopes: ScopeSet,
        approved_by: Option<Uuid>,
    ) -> KernelResult<WorkloadScopePolicy> {
        let mut policy = self
            .repo
            .latest_scope_policy(principal_id)
            .await?
            .ok_or(KernelError::PrincipalNotFound(principal_id))?;
        policy.approve(scopes, approved_by);
        self.repo.update_scope_policy(&policy).await?;
        Ok(policy)
    }

    /// Mint a grant for a principal acting on behalf of a user.
    /// `effective_scopes = requested ∩ approved`; an empty intersection is a
    /// policy violation rather than a silently-useless grant.
    pub async fn create_delegation_grant(
        &self,
        tenant_id: Uuid,
        principal_id: Uuid,
        initiator_user_id: Option<Uuid>,
        requested_scopes: &ScopeSet,
        ttl: Option<Duration>,
    ) -> KernelResult<DelegationGrant> {
        let policy = self
            .repo
            .latest_scope_policy(principal_id)
            .await?
            .ok_or(KernelError::PrincipalNotFound(principal_id))?;

        let effective = requested_scopes.intersect(&policy.approved_scopes);
        if effective.is_empty() {
            return Err(PolicyViolation::EmptyEffectiveScopes.into());
        }

        let grant = DelegationGrant::new(
            tenant_id,
            principal_id,
            initiator_user_id,
            requested_scopes.clone(),
            effective,
            ttl.unwrap_or_else(default_grant_ttl),
        );
        self.repo.create_grant(&grant).await?;
        Ok(grant)
    }

    /// Build (without persisting) the grant a spawned child inherits.
    ///
    /// `effective = parent.effective ∩ requested_subset ∩ policy subset`
    /// (the policy term applies only when the policy names a subset).
    /// A subset escaping the parent's effective scopes is rejected outright.
    pub fn derive_child_grant(
        &self,
        parent_grant: &DelegationGrant,
        child_principal_id: Uuid,
        requested_subset: &ScopeSet,
        policy: &PolicySnapshot,
        ttl: Option<Duration>,
    ) -> KernelResult<DelegationGrant> {
        if !requested_subset.is_subset(&parent_grant.effective_scopes) {
            return Err(PolicyViolation::ScopeNotWithinCaller.into());
        }

        let mut effective = parent_grant.effective_scopes.intersect(requested_subset);
        if !policy.allowed_scope_subset.is_empty() {
            effective = effective.intersect(&policy.allowed_scope_subset);
        }
        if effective.is_empty() {
            return Err(PolicyViolation::EmptyEffectiveScopes.into());
        }

        Ok(DelegationGrant::new(
            parent_grant.tenant_id,
            child_principal_id,
            parent_grant.initiator_user_id,
            requested_subset.clone(),
            effective,
            ttl.unwrap_or_else(default_grant_ttl),
        ))
    }

    pub async fn get_grant(&self, id: Uuid) -> KernelResult<DelegationGrant> {
        self.repo.get_grant(id).await?.ok_or(KernelError::GrantNotFound(id))
    }

    /// Revoke a grant and every bearer token issued against it. Downstream
    /// token checks fail fast on the revoked registry rows.
    pub async fn revoke_grant(&self, grant_id: Uuid, reason: &str) -> KernelResult<u64> {
        self.repo.update_grant_status(grant_id, GrantStatus::Revoked).await?;
        let revoked = self.repo.revoke_jtis_for_grant(grant_id, reason, Utc::now()).await?;
        info!(grant_id = %grant_id, reason = reason, tokens_revoked = revoked, "delegation grant revoked");
        Ok(revoked)
    }

    /// Register a fresh token id for a grant.
    pub async fn issue_token_jti(&self, grant: &DelegationGrant) -> KernelResult<TokenJti> {
        let entry = TokenJti::new(grant.id, grant.expires_at);
        self.repo.register_jti(&entry).await?;
        Ok(entry)
    }

    /// Whether a token id is known, unrevoked, and unexpired.
    pub async fn is_jti_active(&self, jti: &str) -> KernelResult<bool> {
        Ok(self
            .repo
            .get_jti(jti)
            .await?
            .is_some_and(|entry| entry.is_active(Utc::now())))
    }

    /// Delete expired registry rows. Intended for a periodic sweeper.
    pub async fn sweep_expired_jtis(&self) -> KernelResult<u64> {
        self.repo.sweep_expired_jtis(Utc::now()).await
    }
}
