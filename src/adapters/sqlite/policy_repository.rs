//! SQLite implementation of the PolicyRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::{parse_datetime, parse_json_or_default, parse_optional_uuid, parse_uuid};
use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{AllowlistEntry, FailurePolicy, OrchestratorPolicy};
use crate::domain::ports::PolicyRepository;

#[derive(Clone)]
pub struct SqlitePolicyRepository {
    pool: SqlitePool,
}

impl SqlitePolicyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PolicyRow {
    id: String,
    tenant_id: String,
    orchestrator_agent_id: String,
    is_active: i64,
    enforce_published_only: i64,
    default_failure_policy: String,
    max_depth: i64,
    max_fanout: i64,
    max_children_total: i64,
    join_timeout_s: i64,
    allowed_scope_subset: String,
    capability_manifest_version: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<PolicyRow> for OrchestratorPolicy {
    type Error = KernelError;

    fn try_from(row: PolicyRow) -> KernelResult<Self> {
        Ok(OrchestratorPolicy {
            id: parse_uuid(&row.id)?,
            tenant_id: parse_uuid(&row.tenant_id)?,
            orchestrator_agent_id: parse_uuid(&row.orchestrator_agent_id)?,
            is_active: row.is_active != 0,
            enforce_published_only: row.enforce_published_only != 0,
            default_failure_policy: FailurePolicy::from_str(&row.default_failure_policy)
                .unwrap_or_default(),
            max_depth: u32::try_from(row.max_depth).unwrap_or(0),
            max_fanout: u32::try_from(row.max_fanout).unwrap_or(0),
            max_children_total: u32::try_from(row.max_children_total).unwrap_or(0),
            join_timeout_s: u32::try_from(row.join_timeout_s).unwrap_or(0),
            allowed_scope_subset: parse_json_or_default(Some(row.allowed_scope_subset))?,
            capability_manifest_version: u32::try_from(row.capability_manifest_version).unwrap_or(1),
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AllowlistRow {
    id: String,
    tenant_id: String,
    orchestrator_agent_id: String,
    target_agent_id: Option<String>,
    target_agent_slug: Option<String>,
    capability_tag: Option<String>,
    is_active: i64,
    created_at: String,
}

impl TryFrom<AllowlistRow> for AllowlistEntry {
    type Error = KernelError;

    fn try_from(row: AllowlistRow) -> KernelResult<Self> {
        Ok(AllowlistEntry {
            id: parse_uuid(&row.id)?,
            tenant_id: parse_uuid(&row.tenant_id)?,
            orchestrator_agent_id: parse_uuid(&row.orchestrator_agent_id)?,
            target_agent_id: parse_optional_uuid(row.target_agent_id)?,
            target_agent_slug: row.target_agent_slug,
            capability_tag: row.capability_tag,
            is_active: row.is_active != 0,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

#[async_trait]
impl PolicyRepository for SqlitePolicyRepository {
    async fn find(&self, tenant_id: Uuid, orchestrator_agent_id: Uuid) -> KernelResult<Option<OrchestratorPolicy>> {
        let row: Option<PolicyRow> = sqlx::query_as(
            r#"SELECT * FROM orchestrator_policies
               WHERE tenant_id = ? AND orchestrator_agent_id = ? AND is_active = 1"#,
        )
        .bind(tenant_id.to_string())
        .bind(orchestrator_agent_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(OrchestratorPolicy::try_from).transpose()
    }

    async fn upsert(&self, policy: &OrchestratorPolicy) -> KernelResult<()> {
        sqlx::query(
            r#"INSERT INTO orchestrator_policies (id, tenant_id, orchestrator_agent_id, is_active,
               enforce_published_only, default_failure_policy, max_depth, max_fanout,
               max_children_total, join_timeout_s, allowed_scope_subset,
               capability_manifest_version, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (tenant_id, orchestrator_agent_id) DO UPDATE SET
                   is_active = excluded.is_active,
                   enforce_published_only = excluded.enforce_published_only,
                   default_failure_policy = excluded.default_failure_policy,
                   max_depth = excluded.max_depth,
                   max_fanout = excluded.max_fanout,
                   max_children_total = excluded.max_children_total,
                   join_timeout_s = excluded.join_timeout_s,
                   allowed_scope_subset = excluded.allowed_scope_subset,
                   capability_manifest_version = excluded.capability_manifest_version,
                   updated_at = excluded.updated_at"#,
        )
        .bind(policy.id.to_string())
        .bind(policy.tenant_id.to_string())
        .bind(policy.orchestrator_agent_id.to_string())
        .bind(i64::from(policy.is_active))
        .bind(i64::from(policy.enforce_published_only))
        .bind(policy.default_failure_policy.as_str())
        .bind(i64::from(policy.max_depth))
        .bind(i64::from(policy.max_fanout))
        .bind(i64::from(policy.max_children_total))
        .bind(i64::from(policy.join_timeout_s))
        .bind(serde_json::to_string(&policy.allowed_scope_subset)?)
        .bind(i64::from(policy.capability_manifest_version))
        .bind(policy.created_at.to_rfc3339())
        .bind(policy.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn allowlist(&self, tenant_id: Uuid, orchestrator_agent_id: Uuid) -> KernelResult<Vec<AllowlistEntry>> {
        let rows: Vec<AllowlistRow> = sqlx::query_as(
            r#"SELECT * FROM orchestrator_target_allowlists
               WHERE tenant_id = ? AND orchestrator_agent_id = ? AND is_active = 1
               ORDER BY created_at, id"#,
        )
        .bind(tenant_id.to_string())
        .bind(orchestrator_agent_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AllowlistEntry::try_from).collect()
    }

    async fn add_allowlist_entry(&self, entry: &AllowlistEntry) -> KernelResult<()> {
        sqlx::query(
            r#"INSERT INTO orchestrator_target_allowlists (id, tenant_id, orchestrator_agent_id,
               target_agent_id, target_agent_slug, capability_tag, is_active, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.id.to_string())
        .bind(entry.tenant_id.to_string())
        .bind(entry.orchestrator_agent_id.to_string())
        .bind(entry.target_agent_id.map(|id| id.to_string()))
        .bind(&entry.target_agent_slug)
        .bind(&entry.capability_tag)
        .bind(i64::from(entry.is_active))
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
