//! SQLite implementation of the AgentRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::{parse_datetime, parse_uuid};
use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{Agent, AgentStatus};
use crate::domain::ports::AgentRepository;

#[derive(Clone)]
pub struct SqliteAgentRepository {
    pool: SqlitePool,
}

impl SqliteAgentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AgentRow {
    id: String,
    tenant_id: String,
    name: String,
    slug: String,
    status: String,
    graph_definition: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<AgentRow> for Agent {
    type Error = KernelError;

    fn try_from(row: AgentRow) -> KernelResult<Self> {
        Ok(Agent {
            id: parse_uuid(&row.id)?,
            tenant_id: parse_uuid(&row.tenant_id)?,
            name: row.name,
            slug: row.slug,
            status: AgentStatus::from_str(&row.status).ok_or_else(|| {
                KernelError::Serialization(format!("unknown agent status: {}", row.status))
            })?,
            graph_definition: serde_json::from_str(&row.graph_definition)
                .map_err(|e| KernelError::Serialization(e.to_string()))?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[async_trait]
impl AgentRepository for SqliteAgentRepository {
    async fn create(&self, agent: &Agent) -> KernelResult<()> {
        sqlx::query(
            r#"INSERT INTO agents (id, tenant_id, name, slug, status, graph_definition,
               created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(agent.id.to_string())
        .bind(agent.tenant_id.to_string())
        .bind(&agent.name)
        .bind(&agent.slug)
        .bind(agent.status.as_str())
        .bind(serde_json::to_string(&agent.graph_definition)?)
        .bind(agent.created_at.to_rfc3339())
        .bind(agent.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> KernelResult<Option<Agent>> {
        let row: Option<AgentRow> = sqlx::query_as("SELECT * FROM agents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Agent::try_from).transpose()
    }

    async fn find_by_slug(&self, tenant_id: Uuid, slug: &str) -> KernelResult<Option<Agent>> {
        let row: Option<AgentRow> =
            sqlx::query_as("SELECT * FROM agents WHERE tenant_id = ? AND slug = ?")
                .bind(tenant_id.to_string())
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Agent::try_from).transpose()
    }
}
