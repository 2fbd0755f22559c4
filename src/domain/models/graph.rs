//! Agent graph model for static validation.
//!
//! Graphs are node/edge DAGs with a spec version. The "2.0" spec adds the
//! orchestration node set (spawn_run, spawn_group, join, cancel_subtree,
//! evaluate_and_replan), which is validated against the orchestrator's
//! policy before a run begins.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identity::ScopeSet;

/// Spec version that unlocks orchestration nodes.
pub const SPEC_VERSION_V2: &str = "2.0";

/// Node types introduced by the v2 graph spec.
pub const ORCHESTRATION_NODE_TYPES: &[&str] = &[
    "spawn_run",
    "spawn_group",
    "join",
    "cancel_subtree",
    "evaluate_and_replan",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentGraph {
    #[serde(default = "default_spec_version")]
    pub spec_version: String,
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

fn default_spec_version() -> String {
    "1.0".to_string()
}

impl AgentGraph {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Nodes belonging to the orchestration node set.
    pub fn orchestration_nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter().filter(|n| n.is_orchestration())
    }

    pub fn is_v2(&self) -> bool {
        self.spec_version == SPEC_VERSION_V2
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl GraphNode {
    pub fn is_orchestration(&self) -> bool {
        ORCHESTRATION_NODE_TYPES.contains(&self.node_type.as_str())
    }

    /// Deserialize this node's config into a typed view. Missing fields fall
    /// back to the view's defaults; a malformed blob is a validation issue
    /// for the caller, not a panic.
    pub fn typed_config<T: serde::de::DeserializeOwned + Default>(&self) -> Result<T, serde_json::Error> {
        if self.config.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.config.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub source_handle: Option<String>,
}

/// Typed config of a `spawn_run` node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpawnRunNodeConfig {
    #[serde(default)]
    pub target_agent_id: Option<Uuid>,
    #[serde(default)]
    pub target_agent_slug: Option<String>,
    #[serde(default)]
    pub scope_subset: ScopeSet,
    #[serde(default)]
    pub mapped_input_payload: serde_json::Value,
    #[serde(default)]
    pub timeout_s: Option<u32>,
}

/// One target of a `spawn_group` node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpawnGroupTarget {
    #[serde(default)]
    pub target_agent_id: Option<Uuid>,
    #[serde(default)]
    pub target_agent_slug: Option<String>,
    #[serde(default)]
    pub mapped_input_payload: serde_json::Value,
}

/// Typed config of a `spawn_group` node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpawnGroupNodeConfig {
    #[serde(default)]
    pub targets: Vec<SpawnGroupTarget>,
    #[serde(default)]
    pub scope_subset: ScopeSet,
    #[serde(default)]
    pub join_mode: Option<String>,
    #[serde(default)]
    pub quorum_threshold: Option<u32>,
    #[serde(default)]
    pub timeout_s: Option<u32>,
}

/// Typed config of a `join` node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinNodeConfig {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub quorum_threshold: Option<u32>,
    /// Literal group id known at compile time.
    #[serde(default)]
    pub orchestration_group_id: Option<Uuid>,
    /// Reference to the upstream spawn_group node that produces the group.
    #[serde(default)]
    pub group_node: Option<String>,
    #[serde(default)]
    pub timeout_s: Option<u32>,
}
