//! Agent domain model.
//!
//! Agents are the spawn targets of the kernel: tenant-scoped graph
//! definitions addressed by id or slug. Only published agents may be
//! spawned when the orchestrator policy enforces it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Publication state of an agent definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Draft,
    Published,
    Archived,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Draft
    }
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// A tenant-scoped agent definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub slug: String,
    pub status: AgentStatus,
    /// Node/edge DAG as stored; parsed by the graph validator.
    pub graph_definition: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(tenant_id: Uuid, name: impl Into<String>, slug: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            slug: slug.into(),
            status: AgentStatus::default(),
            graph_definition: serde_json::json!({"nodes": [], "edges": []}),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn published(mut self) -> Self {
        self.status = AgentStatus::Published;
        self
    }

    pub fn is_published(&self) -> bool {
        self.status == AgentStatus::Published
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_agents_start_as_draft() {
        let agent = Agent::new(Uuid::new_v4(), "Worker", "worker");
        assert_eq!(agent.status, AgentStatus::Draft);
        assert!(!agent.is_published());
        assert!(agent.published().is_published());
    }

    #[test]
    fn test_status_round_trip() {
        for s in [AgentStatus::Draft, AgentStatus::Published, AgentStatus::Archived] {
            assert_eq!(AgentStatus::from_str(s.as_str()), Some(s));
        }
    }
}
