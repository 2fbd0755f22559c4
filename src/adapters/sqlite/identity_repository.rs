//! SQLite implementation of the IdentityRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::{
    parse_datetime, parse_json_or_default, parse_optional_datetime, parse_optional_uuid, parse_uuid,
};
use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{
    DelegationGrant, GrantStatus, PrincipalType, ScopePolicyStatus, TokenJti, WorkloadPrincipal,
    WorkloadScopePolicy,
};
use crate::domain::ports::IdentityRepository;

#[derive(Clone)]
pub struct SqliteIdentityRepository {
    pool: SqlitePool,
}

impl SqliteIdentityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PrincipalRow {
    id: String,
    tenant_id: String,
    name: String,
    slug: String,
    principal_type: String,
    is_active: i64,
    created_by: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<PrincipalRow> for WorkloadPrincipal {
    type Error = KernelError;

    fn try_from(row: PrincipalRow) -> KernelResult<Self> {
        Ok(WorkloadPrincipal {
            id: parse_uuid(&row.id)?,
            tenant_id: parse_uuid(&row.tenant_id)?,
            name: row.name,
            slug: row.slug,
            principal_type: PrincipalType::from_str(&row.principal_type).ok_or_else(|| {
                KernelError::Serialization(format!("unknown principal type: {}", row.principal_type))
            })?,
            is_active: row.is_active != 0,
            created_by: parse_optional_uuid(row.created_by)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ScopePolicyRow {
    id: String,
    principal_id: String,
    requested_scopes: String,
    approved_scopes: String,
    status: String,
    approved_by: Option<String>,
    approved_at: Option<String>,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ScopePolicyRow> for WorkloadScopePolicy {
    type Error = KernelError;

    fn try_from(row: ScopePolicyRow) -> KernelResult<Self> {
        Ok(WorkloadScopePolicy {
            id: parse_uuid(&row.id)?,
            principal_id: parse_uuid(&row.principal_id)?,
            requested_scopes: parse_json_or_default(Some(row.requested_scopes))?,
            approved_scopes: parse_json_or_default(Some(row.approved_scopes))?,
            status: ScopePolicyStatus::from_str(&row.status).ok_or_else(|| {
                KernelError::Serialization(format!("unknown scope policy status: {}", row.status))
            })?,
            approved_by: parse_optional_uuid(row.approved_by)?,
            approved_at: parse_optional_datetime(row.approved_at)?,
            version: u32::try_from(row.version).unwrap_or(1),
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct GrantRow {
    id: String,
    tenant_id: String,
    principal_id: String,
    initiator_user_id: Option<String>,
    run_id: Option<String>,
    requested_scopes: String,
    effective_scopes: String,
    status: String,
    expires_at: String,
    created_at: String,
}

impl TryFrom<GrantRow> for DelegationGrant {
    type Error = KernelError;

    fn try_from(row: GrantRow) -> KernelResult<Self> {
        Ok(DelegationGrant {
            id: parse_uuid(&row.id)?,
            tenant_id: parse_uuid(&row.tenant_id)?,
            principal_id: parse_uuid(&row.principal_id)?,
            initiator_user_id: parse_optional_uuid(row.initiator_user_id)?,
            run_id: parse_optional_uuid(row.run_id)?,
            requested_scopes: parse_json_or_default(Some(row.requested_scopes))?,
            effective_scopes: parse_json_or_default(Some(row.effective_scopes))?,
            status: GrantStatus::from_str(&row.status).ok_or_else(|| {
                KernelError::Serialization(format!("unknown grant status: {}", row.status))
            })?,
            expires_at: parse_datetime(&row.expires_at)?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JtiRow {
    jti: String,
    grant_id: String,
    expires_at: String,
    revoked_at: Option<String>,
    revocation_reason: Option<String>,
    created_at: String,
}

impl TryFrom<JtiRow> for TokenJti {
    type Error = KernelError;

    fn try_from(row: JtiRow) -> KernelResult<Self> {
        Ok(TokenJti {
            jti: row.jti,
            grant_id: parse_uuid(&row.grant_id)?,
            expires_at: parse_datetime(&row.expires_at)?,
            revoked_at: parse_optional_datetime(row.revoked_at)?,
            revocation_reason: row.revocation_reason,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

/// Insert one delegation grant row. Shared with the spawn transactions.
pub(crate) async fn insert_grant<'e, E>(executor: E, grant: &DelegationGrant) -> KernelResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let requested = serde_json::to_string(&grant.requested_scopes)?;
    let effective = serde_json::to_string(&grant.effective_scopes)?;

    sqlx::query(
        r#"INSERT INTO delegation_grants (id, tenant_id, principal_id, initiator_user_id,
           run_id, requested_scopes, effective_scopes, status, expires_at, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(grant.id.to_string())
    .bind(grant.tenant_id.to_string())
    .bind(grant.principal_id.to_string())
    .bind(grant.initiator_user_id.map(|id| id.to_string()))
    .bind(grant.run_id.map(|id| id.to_string()))
    .bind(&requested)
    .bind(&effective)
    .bind(grant.status.as_str())
    .bind(grant.expires_at.to_rfc3339())
    .bind(grant.created_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

#[async_trait]
impl IdentityRepository for SqliteIdentityRepository {
    async fn create_principal(&self, principal: &WorkloadPrincipal) -> KernelResult<()> {
        sqlx::query(
            r#"INSERT INTO workload_principals (id, tenant_id, name, slug, principal_type,
               is_active, created_by, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(principal.id.to_string())
        .bind(principal.tenant_id.to_string())
        .bind(&principal.name)
        .bind(&principal.slug)
        .bind(principal.principal_type.as_str())
        .bind(i64::from(principal.is_active))
        .bind(principal.created_by.map(|id| id.to_string()))
        .bind(principal.created_at.to_rfc3339())
        .bind(principal.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_principal(&self, id: Uuid) -> KernelResult<Option<WorkloadPrincipal>> {
        let row: Option<PrincipalRow> = sqlx::query_as("SELECT * FROM workload_principals WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(WorkloadPrincipal::try_from).transpose()
    }

    async fn find_principal(&self, tenant_id: Uuid, slug: &str) -> KernelResult<Option<WorkloadPrincipal>> {
        let row: Option<PrincipalRow> =
            sqlx::query_as("SELECT * FROM workload_principals WHERE tenant_id = ? AND slug = ?")
                .bind(tenant_id.to_string())
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?;
        row.map(WorkloadPrincipal::try_from).transpose()
    }

    async fn create_scope_policy(&self, policy: &WorkloadScopePolicy) -> KernelResult<()> {
        sqlx::query(
            r#"INSERT INTO workload_scope_policies (id, principal_id, requested_scopes,
               approved_scopes, status, approved_by, approved_at, version, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(policy.id.to_string())
        .bind(policy.principal_id.to_string())
        .bind(serde_json::to_string(&policy.requested_scopes)?)
        .bind(serde_json::to_string(&policy.approved_scopes)?)
        .bind(policy.status.as_str())
        .bind(policy.approved_by.map(|id| id.to_string()))
        .bind(policy.approved_at.map(|t| t.to_rfc3339()))
        .bind(i64::from(policy.version))
        .bind(policy.created_at.to_rfc3339())
        .bind(policy.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_scope_policy(&self, principal_id: Uuid) -> KernelResult<Option<WorkloadScopePolicy>> {
        let row: Option<ScopePolicyRow> = sqlx::query_as(
            "SELECT * FROM workload_scope_policies WHERE principal_id = ? ORDER BY version DESC LIMIT 1",
        )
        .bind(principal_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(WorkloadScopePolicy::try_from).transpose()
    }

    async fn update_scope_policy(&self, policy: &WorkloadScopePolicy) -> KernelResult<()> {
        let result = sqlx::query(
            r#"UPDATE workload_scope_policies
               SET requested_scopes = ?, approved_scopes = ?, status = ?, approved_by = ?,
                   approved_at = ?, version = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(serde_json::to_string(&policy.requested_scopes)?)
        .bind(serde_json::to_string(&policy.approved_scopes)?)
        .bind(policy.status.as_str())
        .bind(policy.approved_by.map(|id| id.to_string()))
        .bind(policy.approved_at.map(|t| t.to_rfc3339()))
        .bind(i64::from(policy.version))
        .bind(policy.updated_at.to_rfc3339())
        .bind(policy.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(KernelError::StoreConflict(format!(
                "scope policy {} vanished during update",
                policy.id
            )));
        }
        Ok(())
    }

    async fn create_grant(&self, grant: &DelegationGrant) -> KernelResult<()> {
        insert_grant(&self.pool, grant).await
    }

    async fn get_grant(&self, id: Uuid) -> KernelResult<Option<DelegationGrant>> {
        let row: Option<GrantRow> = sqlx::query_as("SELECT * FROM delegation_grants WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(DelegationGrant::try_from).transpose()
    }

    async fn update_grant_status(&self, id: Uuid, status: GrantStatus) -> KernelResult<()> {
        let result = sqlx::query("UPDATE delegation_grants SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(KernelError::GrantNotFound(id));
        }
        Ok(())
    }

    async fn register_jti(&self, entry: &TokenJti) -> KernelResult<()> {
        sqlx::query(
            r#"INSERT INTO token_jti_registry (jti, grant_id, expires_at, revoked_at,
               revocation_reason, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&entry.jti)
        .bind(entry.grant_id.to_string())
        .bind(entry.expires_at.to_rfc3339())
        .bind(entry.revoked_at.map(|t| t.to_rfc3339()))
        .bind(&entry.revocation_reason)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_jti(&self, jti: &str) -> KernelResult<Option<TokenJti>> {
        let row: Option<JtiRow> = sqlx::query_as("SELECT * FROM token_jti_registry WHERE jti = ?")
            .bind(jti)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TokenJti::try_from).transpose()
    }

    async fn revoke_jtis_for_grant(&self, grant_id: Uuid, reason: &str, at: DateTime<Utc>) -> KernelResult<u64> {
        let result = sqlx::query(
            r#"UPDATE token_jti_registry
               SET revoked_at = ?, revocation_reason = ?
               WHERE grant_id = ? AND revoked_at IS NULL"#,
        )
        .bind(at.to_rfc3339())
        .bind(reason)
        .bind(grant_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn sweep_expired_jtis(&self, now: DateTime<Utc>) -> KernelResult<u64> {
        let result = sqlx::query("DELETE FROM token_jti_registry WHERE expires_at < ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
