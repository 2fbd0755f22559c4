//! Static validation of orchestration nodes in v2 agent graphs.
//!
//! Runs before a graph may execute. Collects every problem it can find
//! rather than failing on the first: feature gating, spec-version fencing,
//! per-node policy checks against the orchestrator's snapshot, and
//! conservative worst-case limit sums. A graph that could exceed a limit on
//! any execution path is rejected.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{
    AgentGraph, GraphNode, JoinMode, JoinNodeConfig, OrchestrationConfig, PolicySnapshot,
    SpawnGroupNodeConfig, SpawnRunNodeConfig, SPEC_VERSION_V2,
};
use crate::domain::ports::AgentRepository;
use crate::services::kernel::TargetRef;
use crate::services::policy::PolicyService;

/// One problem found during static validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub node_id: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    fn graph(message: impl Into<String>) -> Self {
        Self { node_id: None, message: message.into() }
    }

    fn node(node: &GraphNode, message: impl Into<String>) -> Self {
        Self { node_id: Some(node.id.clone()), message: message.into() }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node_id {
            Some(node) => write!(f, "{node}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

pub struct GraphValidator {
    policy: PolicyService,
    agents: Arc<dyn AgentRepository>,
    config: OrchestrationConfig,
}

impl GraphValidator {
    pub fn new(policy: PolicyService, agents: Arc<dyn AgentRepository>, config: OrchestrationConfig) -> Self {
        Self { policy, agents, config }
    }

    /// Validate a graph's orchestration nodes. `tenant_id` and
    /// `orchestrator_agent_id` unlock the policy-backed checks; without them
    /// only structural checks run (the compiler may be invoked before an
    /// agent exists).
    pub async fn validate(
        &self,
        graph: &AgentGraph,
        tenant_id: Option<Uuid>,
        orchestrator_agent_id: Option<Uuid>,
    ) -> KernelResult<Vec<ValidationIssue>> {
        let mut issues = Vec::new();

        let orchestration_nodes: Vec<&GraphNode> = graph.orchestration_nodes().collect();
        if orchestration_nodes.is_empty() {
            return Ok(issues);
        }

        if !graph.is_v2() {
            issues.push(ValidationIssue::graph(format!(
                "orchestration nodes require spec_version='{SPEC_VERSION_V2}'"
            )));
        }

        if !self.config.graph_v2.allows(tenant_id) {
            for node in &orchestration_nodes {
                issues.push(ValidationIssue::node(
                    node,
                    "GraphSpec v2 orchestration nodes are disabled by feature flag for this tenant",
                ));
            }
        }

        let policy = match (tenant_id, orchestrator_agent_id) {
            (Some(tenant), Some(orchestrator)) => {
                Some(self.policy.get_policy(tenant, orchestrator).await?)
            }
            _ => None,
        };

        let mut declared_children_total: u64 = 0;
        for node in &orchestration_nodes {
            match node.node_type.as_str() {
                "spawn_run" => {
                    declared_children_total += 1;
                    self.check_spawn_run(node, tenant_id, policy.as_ref(), &mut issues).await?;
                }
                "spawn_group" => {
                    declared_children_total +=
                        self.check_spawn_group(node, tenant_id, policy.as_ref(), &mut issues).await?;
                }
                "join" => check_join(graph, node, &mut issues),
                // cancel_subtree and evaluate_and_replan carry no static
                // contract beyond the version/gate fencing above.
                _ => {}
            }
        }

        if let Some(policy) = &policy {
            if declared_children_total > u64::from(policy.max_children_total) {
                issues.push(ValidationIssue::graph(format!(
                    "max_children_total exceeded ({declared_children_total} > {})",
                    policy.max_children_total
                )));
            }

            match max_spawn_chain(graph) {
                Some(worst_depth) => {
                    if worst_depth > policy.max_depth {
                        issues.push(ValidationIssue::graph(format!(
                            "max_depth exceeded ({worst_depth} > {})",
                            policy.max_depth
                        )));
                    }
                }
                None => issues.push(ValidationIssue::graph("graph contains a cycle")),
            }
        }

        Ok(issues)
    }

    async fn check_spawn_run(
        &self,
        node: &GraphNode,
        tenant_id: Option<Uuid>,
        policy: Option<&PolicySnapshot>,
        issues: &mut Vec<ValidationIssue>,
    ) -> KernelResult<()> {
        let config: SpawnRunNodeConfig = match node.typed_config() {
            Ok(config) => config,
            Err(err) => {
                issues.push(ValidationIssue::node(node, format!("invalid spawn_run config: {err}")));
                return Ok(());
            }
        };

        self.check_scope_subset(node, &config.scope_subset, policy, issues);
        self.check_target(node, tenant_id, policy, config.target_agent_id, config.target_agent_slug, issues)
            .await
    }

    /// Returns the node's declared fanout for the whole-graph total.
    async fn check_spawn_group(
        &self,
        node: &GraphNode,
        tenant_id: Option<Uuid>,
        policy: Option<&PolicySnapshot>,
        issues: &mut Vec<ValidationIssue>,
    ) -> KernelResult<u64> {
        let config: SpawnGroupNodeConfig = match node.typed_config() {
            Ok(config) => config,
            Err(err) => {
                issues.push(ValidationIssue::node(node, format!("invalid spawn_group config: {err}")));
                return Ok(0);
            }
        };

        if config.targets.is_empty() {
            issues.push(ValidationIssue::node(node, "spawn_group requires at least one target"));
        }

        if let Some(mode) = &config.join_mode {
            match JoinMode::from_str(mode) {
                Some(JoinMode::Quorum) => {
                    if config.quorum_threshold.is_none_or(|k| k < 1) {
                        issues.push(ValidationIssue::node(
                            node,
                            "quorum mode requires a positive quorum_threshold",
                        ));
                    }
                }
                Some(_) => {}
                None => issues.push(ValidationIssue::node(node, format!("Unsupported join mode: {mode}"))),
            }
        }

        self.check_scope_subset(node, &config.scope_subset, policy, issues);

        let fanout = u64::try_from(config.targets.len()).unwrap_or(u64::MAX);
        if let Some(policy) = policy {
            if fanout > u64::from(policy.max_fanout) {
                issues.push(ValidationIssue::node(
                    node,
                    format!("max_fanout exceeded ({fanout} > {})", policy.max_fanout),
                ));
            }
        }

        for target in &config.targets {
            self.check_target(
                node,
                tenant_id,
                policy,
                target.target_agent_id,
                target.target_agent_slug.clone(),
                issues,
            )
            .await?;
        }

        Ok(fanout)
    }

    fn check_scope_subset(
        &self,
        node: &GraphNode,
        scope_subset: &crate::domain::models::ScopeSet,
        policy: Option<&PolicySnapshot>,
        issues: &mut Vec<ValidationIssue>,
    ) {
        if scope_subset.is_empty() {
            issues.push(ValidationIssue::node(node, "scope_subset is required"));
            return;
        }
        if let Some(policy) = policy {
            if !policy.allowed_scope_subset.is_empty() && !scope_subset.is_subset(&policy.allowed_scope_subset) {
                issues.push(ValidationIssue::node(
                    node,
                    "scope_subset exceeds orchestrator policy capability set",
                ));
            }
        }
    }

    async fn check_target(
        &self,
        node: &GraphNode,
        tenant_id: Option<Uuid>,
        policy: Option<&PolicySnapshot>,
        target_agent_id: Option<Uuid>,
        target_agent_slug: Option<String>,
        issues: &mut Vec<ValidationIssue>,
    ) -> KernelResult<()> {
        let target = match TargetRef::from_parts(target_agent_id, target_agent_slug) {
            Ok(target) => target,
            Err(_) => {
                issues.push(ValidationIssue::node(
                    node,
                    "target_agent_id or target_agent_slug is required",
                ));
                return Ok(());
            }
        };

        let (Some(tenant), Some(policy)) = (tenant_id, policy) else {
            return Ok(());
        };

        let agent = match &target {
            TargetRef::Id(id) => self.agents.get(*id).await?.filter(|a| a.tenant_id == tenant),
            TargetRef::Slug(slug) => self.agents.find_by_slug(tenant, slug).await?,
        };
        let Some(agent) = agent else {
            issues.push(ValidationIssue::node(node, "target agent not found in tenant"));
            return Ok(());
        };

        match self.policy.assert_target_allowed(policy, &agent).await {
            Ok(()) => {}
            Err(KernelError::Policy(violation)) => {
                issues.push(ValidationIssue::node(node, violation.to_string()));
            }
            Err(other) => return Err(other),
        }
        Ok(())
    }
}

fn check_join(graph: &AgentGraph, node: &GraphNode, issues: &mut Vec<ValidationIssue>) {
    let config: JoinNodeConfig = match node.typed_config() {
        Ok(config) => config,
        Err(err) => {
            issues.push(ValidationIssue::node(node, format!("invalid join config: {err}")));
            return;
        }
    };

    if let Some(mode) = &config.mode {
        match JoinMode::from_str(mode) {
            Some(JoinMode::Quorum) => {
                if config.quorum_threshold.is_none_or(|k| k < 1) {
                    issues.push(ValidationIssue::node(
                        node,
                        "quorum mode requires a positive quorum_threshold",
                    ));
                }
            }
            Some(_) => {}
            None => issues.push(ValidationIssue::node(node, format!("Unsupported join mode: {mode}"))),
        }
    }

    // The group contract must be resolvable at compile time: either a
    // literal group id or a reference to exactly one upstream spawn_group.
    let has_literal = config.orchestration_group_id.is_some();
    let has_reference = config
        .group_node
        .as_deref()
        .and_then(|id| graph.node(id))
        .is_some_and(|n| n.node_type == "spawn_group");

    if !has_literal && !has_reference {
        issues.push(ValidationIssue::node(
            node,
            "join requires orchestration_group_id or an upstream spawn_group node reference",
        ));
    }
}

/// Worst-case nesting depth: the maximum number of spawn nodes along any
/// path of the DAG (each spawn node could hand work one level deeper).
/// Returns None when the graph is not acyclic.
fn max_spawn_chain(graph: &AgentGraph) -> Option<u32> {
    let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    let index: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let weight = |i: usize| -> u32 {
        u32::from(matches!(graph.nodes[i].node_type.as_str(), "spawn_run" | "spawn_group"))
    };

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
    let mut indegree: Vec<usize> = vec![0; ids.len()];
    for edge in &graph.edges {
        let (Some(&source), Some(&target)) = (index.get(edge.source.as_str()), index.get(edge.target.as_str()))
        else {
            continue;
        };
        adjacency[source].push(target);
        indegree[target] += 1;
    }

    let mut queue: VecDeque<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| i)
        .collect();
    let mut chain: Vec<u32> = (0..ids.len()).map(weight).collect();
    let mut visited = 0usize;
    let mut best = 0u32;

    while let Some(current) = queue.pop_front() {
        visited += 1;
        best = best.max(chain[current]);
        for &next in &adjacency[current] {
            chain[next] = chain[next].max(chain[current] + weight(next));
            indegree[next] -= 1;
            if indegree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if visited == ids.len() {
        Some(best)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::GraphEdge;

    fn node(id: &str, node_type: &str) -> GraphNode {
        GraphNode { id: id.into(), node_type: node_type.into(), config: serde_json::Value::Null }
    }

    fn edge(id: &str, source: &str, target: &str) -> GraphEdge {
        GraphEdge { id: id.into(), source: source.into(), target: target.into(), source_handle: None }
    }

    #[test]
    fn test_max_spawn_chain_counts_sequential_spawns() {
        let graph = AgentGraph {
            spec_version: "2.0".into(),
            nodes: vec![node("start", "start"), node("a", "spawn_group"), node("b", "spawn_group"), node("end", "end")],
            edges: vec![edge("e0", "start", "a"), edge("e1", "a", "b"), edge("e2", "b", "end")],
        };
        assert_eq!(max_spawn_chain(&graph), Some(2));
    }

    #[test]
    fn test_max_spawn_chain_takes_the_worst_branch() {
        let graph = AgentGraph {
            spec_version: "2.0".into(),
            nodes: vec![
                node("start", "start"),
                node("a", "spawn_run"),
                node("b", "llm"),
                node("c", "spawn_run"),
                node("end", "end"),
            ],
            edges: vec![
                edge("e0", "start", "a"),
                edge("e1", "start", "b"),
                edge("e2", "a", "c"),
                edge("e3", "b", "end"),
                edge("e4", "c", "end"),
            ],
        };
        // start→a→c carries two spawns; start→b carries none.
        assert_eq!(max_spawn_chain(&graph), Some(2));
    }

    #[test]
    fn test_max_spawn_chain_detects_cycles() {
        let graph = AgentGraph {
            spec_version: "2.0".into(),
            nodes: vec![node("a", "spawn_run"), node("b", "llm")],
            edges: vec![edge("e0", "a", "b"), edge("e1", "b", "a")],
        };
        assert_eq!(max_spawn_chain(&graph), None);
    }
}
