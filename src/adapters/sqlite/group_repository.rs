//! SQLite implementation of the GroupRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::identity_repository::insert_grant;
use crate::adapters::sqlite::run_repository::insert_run;
use crate::adapters::sqlite::{is_unique_violation, parse_datetime, parse_optional_datetime, parse_uuid};
use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{
    FailurePolicy, GroupMember, GroupStatus, JoinMode, OrchestrationGroup, Run, RunStatus,
};
use crate::domain::ports::{GroupRepository, GroupSpawnBatch};

#[derive(Clone)]
pub struct SqliteGroupRepository {
    pool: SqlitePool,
}

impl SqliteGroupRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_run(&self, id: Uuid) -> KernelResult<Run> {
        use crate::domain::ports::RunRepository;
        crate::adapters::sqlite::SqliteRunRepository::new(self.pool.clone())
            .get(id)
            .await?
            .ok_or(KernelError::RunNotFound(id))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct GroupRow {
    id: String,
    tenant_id: String,
    orchestrator_run_id: String,
    parent_node_id: Option<String>,
    failure_policy: String,
    join_mode: String,
    quorum_threshold: Option<i64>,
    timeout_s: i64,
    status: String,
    policy_snapshot: String,
    idempotency_key_prefix: String,
    started_at: String,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<GroupRow> for OrchestrationGroup {
    type Error = KernelError;

    fn try_from(row: GroupRow) -> KernelResult<Self> {
        Ok(OrchestrationGroup {
            id: parse_uuid(&row.id)?,
            tenant_id: parse_uuid(&row.tenant_id)?,
            orchestrator_run_id: parse_uuid(&row.orchestrator_run_id)?,
            parent_node_id: row.parent_node_id,
            failure_policy: FailurePolicy::from_str(&row.failure_policy).unwrap_or_default(),
            join_mode: JoinMode::from_str(&row.join_mode).ok_or_else(|| {
                KernelError::Serialization(format!("unknown join mode: {}", row.join_mode))
            })?,
            quorum_threshold: row.quorum_threshold.and_then(|q| u32::try_from(q).ok()),
            timeout_s: u32::try_from(row.timeout_s).unwrap_or(0),
            status: GroupStatus::from_str(&row.status).ok_or_else(|| {
                KernelError::Serialization(format!("unknown group status: {}", row.status))
            })?,
            policy_snapshot: serde_json::from_str(&row.policy_snapshot)
                .map_err(|e| KernelError::Serialization(e.to_string()))?,
            idempotency_key_prefix: row.idempotency_key_prefix,
            started_at: parse_datetime(&row.started_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MemberRow {
    id: String,
    group_id: String,
    run_id: String,
    ordinal: i64,
    status: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<MemberRow> for GroupMember {
    type Error = KernelError;

    fn try_from(row: MemberRow) -> KernelResult<Self> {
        Ok(GroupMember {
            id: parse_uuid(&row.id)?,
            group_id: parse_uuid(&row.group_id)?,
            run_id: parse_uuid(&row.run_id)?,
            ordinal: u32::try_from(row.ordinal).unwrap_or(0),
            status: RunStatus::from_str(&row.status).ok_or_else(|| {
                KernelError::Serialization(format!("unknown member status: {}", row.status))
            })?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

async fn insert_group<'e, E>(executor: E, group: &OrchestrationGroup) -> KernelResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let snapshot_json = serde_json::to_string(&group.policy_snapshot)?;

    let result = sqlx::query(
        r#"INSERT INTO orchestration_groups (id, tenant_id, orchestrator_run_id, parent_node_id,
           failure_policy, join_mode, quorum_threshold, timeout_s, status, policy_snapshot,
           idempotency_key_prefix, started_at, completed_at, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(group.id.to_string())
    .bind(group.tenant_id.to_string())
    .bind(group.orchestrator_run_id.to_string())
    .bind(&group.parent_node_id)
    .bind(group.failure_policy.as_str())
    .bind(group.join_mode.as_str())
    .bind(group.quorum_threshold.map(i64::from))
    .bind(i64::from(group.timeout_s))
    .bind(group.status.as_str())
    .bind(&snapshot_json)
    .bind(&group.idempotency_key_prefix)
    .bind(group.started_at.to_rfc3339())
    .bind(group.completed_at.map(|t| t.to_rfc3339()))
    .bind(group.created_at.to_rfc3339())
    .bind(group.updated_at.to_rfc3339())
    .execute(executor)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(err) if is_unique_violation(&err) => Err(KernelError::StoreConflict(format!(
            "group spawn scope already exists for run {} prefix {}",
            group.orchestrator_run_id, group.idempotency_key_prefix
        ))),
        Err(err) => Err(err.into()),
    }
}

async fn insert_member<'e, E>(executor: E, member: &GroupMember) -> KernelResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"INSERT INTO orchestration_group_members (id, group_id, run_id, ordinal, status,
           created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(member.id.to_string())
    .bind(member.group_id.to_string())
    .bind(member.run_id.to_string())
    .bind(i64::from(member.ordinal))
    .bind(member.status.as_str())
    .bind(member.created_at.to_rfc3339())
    .bind(member.updated_at.to_rfc3339())
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl GroupRepository for SqliteGroupRepository {
    async fn persist_group_spawn(&self, batch: &GroupSpawnBatch) -> KernelResult<()> {
        let mut tx = self.pool.begin().await?;

        insert_group(&mut *tx, &batch.group).await?;
        for child in &batch.children {
            insert_run(&mut *tx, &child.run).await?;
            insert_grant(&mut *tx, &child.grant).await?;
            insert_member(&mut *tx, &child.member).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> KernelResult<Option<OrchestrationGroup>> {
        let row: Option<GroupRow> = sqlx::query_as("SELECT * FROM orchestration_groups WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(OrchestrationGroup::try_from).transpose()
    }

    async fn get_by_spawn_scope(
        &self,
        orchestrator_run_id: Uuid,
        parent_node_id: Option<&str>,
        idempotency_key_prefix: &str,
    ) -> KernelResult<Option<OrchestrationGroup>> {
        let row: Option<GroupRow> = sqlx::query_as(
            r#"SELECT * FROM orchestration_groups
               WHERE orchestrator_run_id = ?
                 AND COALESCE(parent_node_id, '') = COALESCE(?, '')
                 AND idempotency_key_prefix = ?"#,
        )
        .bind(orchestrator_run_id.to_string())
        .bind(parent_node_id)
        .bind(idempotency_key_prefix)
        .fetch_optional(&self.pool)
        .await?;
        row.map(OrchestrationGroup::try_from).transpose()
    }

    async fn members(&self, group_id: Uuid) -> KernelResult<Vec<GroupMember>> {
        let rows: Vec<MemberRow> = sqlx::query_as(
            r#"SELECT * FROM orchestration_group_members
               WHERE group_id = ? ORDER BY ordinal, created_at"#,
        )
        .bind(group_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(GroupMember::try_from).collect()
    }

    async fn member_runs(&self, group_id: Uuid) -> KernelResult<Vec<(GroupMember, Run)>> {
        let members = self.members(group_id).await?;
        let mut out = Vec::with_capacity(members.len());
        for member in members {
            let run = self.load_run(member.run_id).await?;
            out.push((member, run));
        }
        Ok(out)
    }

    async fn update_member_status(&self, group_id: Uuid, run_id: Uuid, status: RunStatus) -> KernelResult<()> {
        sqlx::query(
            r#"UPDATE orchestration_group_members
               SET status = ?, updated_at = ?
               WHERE group_id = ? AND run_id = ?"#,
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(group_id.to_string())
        .bind(run_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete(&self, group_id: Uuid, status: GroupStatus) -> KernelResult<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"UPDATE orchestration_groups
               SET status = ?, completed_at = ?, updated_at = ?
               WHERE id = ? AND status = 'running'"#,
        )
        .bind(status.as_str())
        .bind(&now)
        .bind(&now)
        .bind(group_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
