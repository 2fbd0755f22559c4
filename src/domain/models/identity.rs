//! Workload identity and scoped delegation models.
//!
//! A workload principal is the non-human identity an agent run acts as.
//! Delegation grants bind a principal, an initiating user, and a run to an
//! effective scope set that only ever narrows down the chain.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scope required to invoke any orchestration primitive.
pub const SCOPE_AGENTS_EXECUTE: &str = "agents.execute";

/// Internal wildcard scope that bypasses tenant matching at the surface.
pub const SCOPE_WILDCARD: &str = "*";

/// An ordered set of scope strings with the set algebra the kernel needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    pub fn insert(&mut self, scope: impl Into<String>) {
        self.0.insert(scope.into());
    }

    pub fn is_subset(&self, other: &ScopeSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn intersect(&self, other: &ScopeSet) -> ScopeSet {
        ScopeSet(self.0.intersection(&other.0).cloned().collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        ScopeSet(iter.into_iter().map(Into::into).collect())
    }
}

impl std::fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.iter().cloned().collect::<Vec<_>>().join(","))
    }
}

/// Kind of workload a principal represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalType {
    Agent,
    Tool,
    System,
}

impl PrincipalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Tool => "tool",
            Self::System => "system",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "agent" => Some(Self::Agent),
            "tool" => Some(Self::Tool),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Tenant-scoped identity of an agent/tool/system workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadPrincipal {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub slug: String,
    pub principal_type: PrincipalType,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkloadPrincipal {
    pub fn new(
        tenant_id: Uuid,
        slug: impl Into<String>,
        name: impl Into<String>,
        principal_type: PrincipalType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            slug: slug.into(),
            principal_type,
            is_active: true,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_created_by(mut self, user_id: Option<Uuid>) -> Self {
        self.created_by = user_id;
        self
    }
}

/// Approval state of a principal's scope policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopePolicyStatus {
    Pending,
    Approved,
    Rejected,
}

impl ScopePolicyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Versioned scope policy for a principal. Approval bumps `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadScopePolicy {
    pub id: Uuid,
    pub principal_id: Uuid,
    pub requested_scopes: ScopeSet,
    pub approved_scopes: ScopeSet,
    pub status: ScopePolicyStatus,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkloadScopePolicy {
    pub fn pending(principal_id: Uuid, requested_scopes: ScopeSet) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            principal_id,
            requested_scopes,
            approved_scopes: ScopeSet::new(),
            status: ScopePolicyStatus::Pending,
            approved_by: None,
            approved_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Approve the given scopes, bumping the policy version.
    pub fn approve(&mut self, scopes: ScopeSet, approved_by: Option<Uuid>) {
        self.approved_scopes = scopes;
        self.status = ScopePolicyStatus::Approved;
        self.approved_by = approved_by;
        self.approved_at = Some(Utc::now());
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

/// Lifecycle of a delegation grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    Active,
    Expired,
    Revoked,
}

impl GrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

/// A scoped, time-bounded authorization used by a run to act on behalf of a
/// user through a principal. `effective_scopes` only ever narrows down a
/// delegation chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationGrant {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub principal_id: Uuid,
    pub initiator_user_id: Option<Uuid>,
    pub run_id: Option<Uuid>,
    pub requested_scopes: ScopeSet,
    pub effective_scopes: ScopeSet,
    pub status: GrantStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl DelegationGrant {
    pub fn new(
        tenant_id: Uuid,
        principal_id: Uuid,
        initiator_user_id: Option<Uuid>,
        requested_scopes: ScopeSet,
        effective_scopes: ScopeSet,
        ttl: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            principal_id,
            initiator_user_id,
            run_id: None,
            requested_scopes,
            effective_scopes,
            status: GrantStatus::Active,
            expires_at: now + ttl,
            created_at: now,
        }
    }

    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Active && self.expires_at > now
    }
}

/// Registry row for an issued bearer token. Revocation here invalidates the
/// token before its natural expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenJti {
    pub jti: String,
    pub grant_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revocation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TokenJti {
    pub fn new(grant_id: Uuid, expires_at: DateTime<Utc>) -> Self {
        Self {
            jti: Uuid::new_v4().to_string(),
            grant_id,
            expires_at,
            revoked_at: None,
            revocation_reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes(items: &[&str]) -> ScopeSet {
        items.iter().copied().collect()
    }

    #[test]
    fn test_scope_set_algebra() {
        let a = scopes(&["agents.execute", "tools.read"]);
        let b = scopes(&["agents.execute"]);

        assert!(b.is_subset(&a));
        assert!(!a.is_subset(&b));
        assert_eq!(a.intersect(&b), b);
        assert!(b.intersect(&scopes(&["tools.read"])).is_empty());
    }

    #[test]
    fn test_scope_set_serde_is_transparent() {
        let set = scopes(&["b.scope", "a.scope"]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["a.scope","b.scope"]"#);
        let back: ScopeSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_policy_approval_bumps_version() {
        let mut policy = WorkloadScopePolicy::pending(Uuid::new_v4(), scopes(&["agents.execute"]));
        assert_eq!(policy.version, 1);
        assert_eq!(policy.status, ScopePolicyStatus::Pending);

        policy.approve(scopes(&["agents.execute"]), None);
        assert_eq!(policy.version, 2);
        assert_eq!(policy.status, ScopePolicyStatus::Approved);
        assert!(policy.approved_at.is_some());
    }

    #[test]
    fn test_grant_usability() {
        let grant = DelegationGrant::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            scopes(&["agents.execute"]),
            scopes(&["agents.execute"]),
            chrono::Duration::hours(1),
        );
        assert!(grant.is_usable(Utc::now()));
        assert!(!grant.is_usable(Utc::now() + chrono::Duration::hours(2)));

        let mut revoked = grant;
        revoked.status = GrantStatus::Revoked;
        assert!(!revoked.is_usable(Utc::now()));
    }

    #[test]
    fn test_jti_activity() {
        let mut jti = TokenJti::new(Uuid::new_v4(), Utc::now() + chrono::Duration::minutes(5));
        assert!(jti.is_active(Utc::now()));

        jti.revoked_at = Some(Utc::now());
        assert!(!jti.is_active(Utc::now()));
    }
}
