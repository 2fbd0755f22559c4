//! SQLite implementation of the RunRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::identity_repository::insert_grant;
use crate::adapters::sqlite::{
    is_unique_violation, parse_datetime, parse_optional_datetime, parse_optional_uuid, parse_uuid,
};
use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{DelegationGrant, Run, RunStatus};
use crate::domain::ports::RunRepository;

const TERMINAL_STATUSES: &str = "'completed','failed','cancelled','timed_out'";

#[derive(Clone)]
pub struct SqliteRunRepository {
    pool: SqlitePool,
}

impl SqliteRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RunRow {
    id: String,
    tenant_id: String,
    agent_id: String,
    status: String,
    input: String,
    output: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    initiator_user_id: Option<String>,
    workload_principal_id: Option<String>,
    delegation_grant_id: Option<String>,
    root_run_id: Option<String>,
    parent_run_id: Option<String>,
    parent_node_id: Option<String>,
    depth: i64,
    spawn_key: Option<String>,
    orchestration_group_id: Option<String>,
    timeout_s: Option<i64>,
}

impl TryFrom<RunRow> for Run {
    type Error = KernelError;

    fn try_from(row: RunRow) -> KernelResult<Self> {
        let id = parse_uuid(&row.id)?;
        let status = RunStatus::from_str(&row.status)
            .ok_or_else(|| KernelError::Serialization(format!("unknown run status: {}", row.status)))?;
        Ok(Run {
            id,
            tenant_id: parse_uuid(&row.tenant_id)?,
            agent_id: parse_uuid(&row.agent_id)?,
            initiator_user_id: parse_optional_uuid(row.initiator_user_id)?,
            workload_principal_id: parse_optional_uuid(row.workload_principal_id)?,
            delegation_grant_id: parse_optional_uuid(row.delegation_grant_id)?,
            status,
            root_run_id: parse_optional_uuid(row.root_run_id)?.unwrap_or(id),
            parent_run_id: parse_optional_uuid(row.parent_run_id)?,
            parent_node_id: row.parent_node_id,
            depth: u32::try_from(row.depth).unwrap_or(0),
            spawn_key: row.spawn_key,
            orchestration_group_id: parse_optional_uuid(row.orchestration_group_id)?,
            timeout_s: row.timeout_s.and_then(|t| u32::try_from(t).ok()),
            input: serde_json::from_str(&row.input)
                .map_err(|e| KernelError::Serialization(e.to_string()))?,
            output: row
                .output
                .map(|o| serde_json::from_str(&o))
                .transpose()
                .map_err(|e| KernelError::Serialization(e.to_string()))?,
            created_at: parse_datetime(&row.created_at)?,
            started_at: parse_optional_datetime(row.started_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
        })
    }
}

/// Insert one run row. Shared by the single-spawn and group-spawn
/// transactions, so it takes any executor.
pub(crate) async fn insert_run<'e, E>(executor: E, run: &Run) -> KernelResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let input_json = serde_json::to_string(&run.input)?;
    let output_json = run.output.as_ref().map(serde_json::to_string).transpose()?;

    let result = sqlx::query(
        r#"INSERT INTO runs (id, tenant_id, agent_id, status, input, output,
           created_at, started_at, completed_at,
           initiator_user_id, workload_principal_id, delegation_grant_id,
           root_run_id, parent_run_id, parent_node_id, depth, spawn_key,
           orchestration_group_id, timeout_s)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(run.id.to_string())
    .bind(run.tenant_id.to_string())
    .bind(run.agent_id.to_string())
    .bind(run.status.as_str())
    .bind(&input_json)
    .bind(output_json)
    .bind(run.created_at.to_rfc3339())
    .bind(run.started_at.map(|t| t.to_rfc3339()))
    .bind(run.completed_at.map(|t| t.to_rfc3339()))
    .bind(run.initiator_user_id.map(|id| id.to_string()))
    .bind(run.workload_principal_id.map(|id| id.to_string()))
    .bind(run.delegation_grant_id.map(|id| id.to_string()))
    .bind(run.root_run_id.to_string())
    .bind(run.parent_run_id.map(|id| id.to_string()))
    .bind(&run.parent_node_id)
    .bind(i64::from(run.depth))
    .bind(&run.spawn_key)
    .bind(run.orchestration_group_id.map(|id| id.to_string()))
    .bind(run.timeout_s.map(i64::from))
    .execute(executor)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(err) => {
            if is_unique_violation(&err) {
                if let (Some(parent), Some(key)) = (run.parent_run_id, run.spawn_key.as_ref()) {
                    return Err(KernelError::SpawnKeyConflict {
                        parent_run_id: parent,
                        spawn_key: key.clone(),
                    });
                }
                return Err(KernelError::StoreConflict(err.to_string()));
            }
            Err(err.into())
        }
    }
}

#[async_trait]
impl RunRepository for SqliteRunRepository {
    async fn create(&self, run: &Run) -> KernelResult<()> {
        insert_run(&self.pool, run).await
    }

    async fn persist_spawn(&self, run: &Run, grant: &DelegationGrant) -> KernelResult<()> {
        let mut tx = self.pool.begin().await?;
        insert_run(&mut *tx, run).await?;
        insert_grant(&mut *tx, grant).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> KernelResult<Option<Run>> {
        let row: Option<RunRow> = sqlx::query_as("SELECT * FROM runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Run::try_from).transpose()
    }

    async fn get_by_spawn_key(&self, parent_run_id: Uuid, spawn_key: &str) -> KernelResult<Option<Run>> {
        let row: Option<RunRow> =
            sqlx::query_as("SELECT * FROM runs WHERE parent_run_id = ? AND spawn_key = ?")
                .bind(parent_run_id.to_string())
                .bind(spawn_key)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Run::try_from).transpose()
    }

    async fn list_children(&self, parent_run_id: Uuid) -> KernelResult<Vec<Run>> {
        let rows: Vec<RunRow> =
            sqlx::query_as("SELECT * FROM runs WHERE parent_run_id = ? ORDER BY created_at, id")
                .bind(parent_run_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Run::try_from).collect()
    }

    async fn count_children(&self, parent_run_id: Uuid) -> KernelResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM runs WHERE parent_run_id = ?")
            .bind(parent_run_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn count_descendants(&self, root_run_id: Uuid) -> KernelResult<u64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM runs WHERE root_run_id = ? AND parent_run_id IS NOT NULL",
        )
        .bind(root_run_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn update_status(&self, id: Uuid, status: RunStatus) -> KernelResult<()> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(&format!(
            r#"UPDATE runs
               SET status = ?1,
                   started_at = CASE WHEN ?1 = 'running' THEN COALESCE(started_at, ?2) ELSE started_at END,
                   completed_at = CASE WHEN ?1 IN ({TERMINAL_STATUSES}) THEN ?2 ELSE completed_at END
               WHERE id = ?3 AND status NOT IN ({TERMINAL_STATUSES})"#
        ))
        .bind(status.as_str())
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Either the run is gone or it is already terminal.
            let current = self.get(id).await?.ok_or(KernelError::RunNotFound(id))?;
            if current.status == status {
                return Ok(());
            }
            return Err(KernelError::InvalidStateTransition {
                from: current.status.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }
        Ok(())
    }

    async fn cancel_if_active(&self, id: Uuid, reason: Option<&str>) -> KernelResult<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(&format!(
            r#"UPDATE runs
               SET status = 'cancelled',
                   completed_at = ?1,
                   output = CASE
                       WHEN ?2 IS NOT NULL THEN json_set(COALESCE(output, '{{}}'), '$.cancel_reason', ?2)
                       ELSE output
                   END
               WHERE id = ?3 AND status NOT IN ({TERMINAL_STATUSES})"#
        ))
        .bind(&now)
        .bind(reason)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
