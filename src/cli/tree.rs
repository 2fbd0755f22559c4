//! Run-tree rendering.

use std::collections::HashMap;

use uuid::Uuid;

use crate::domain::models::RunStatus;
use crate::services::kernel::{RunTree, TreeNode};

/// Unicode box-drawing characters for tree visualization
const TREE_BRANCH: &str = "├── ";
const TREE_LAST: &str = "└── ";
const TREE_PIPE: &str = "│   ";
const TREE_SPACE: &str = "    ";

/// Render a subtree returned by query_tree, root first.
pub fn render_run_tree(tree: &RunTree) -> String {
    let Some(root) = tree.nodes.first() else {
        return String::new();
    };

    let mut children_of: HashMap<Uuid, Vec<&TreeNode>> = HashMap::new();
    for node in &tree.nodes[1..] {
        if let Some(parent) = node.parent_run_id {
            children_of.entry(parent).or_default().push(node);
        }
    }

    let mut output = String::new();
    render_node(root, &children_of, 0, true, "", &mut output);
    output
}

fn render_node(
    node: &TreeNode,
    children_of: &HashMap<Uuid, Vec<&TreeNode>>,
    depth: usize,
    is_last: bool,
    prefix: &str,
    output: &mut String,
) {
    let connector = if depth == 0 {
        ""
    } else if is_last {
        TREE_LAST
    } else {
        TREE_BRANCH
    };

    output.push_str(&format!(
        "{prefix}{connector}{} {} [{}]\n",
        status_marker(node.status),
        node.run_id,
        node.status.as_str()
    ));

    let Some(children) = children_of.get(&node.run_id) else {
        return;
    };

    let child_prefix = if depth == 0 {
        String::new()
    } else if is_last {
        format!("{prefix}{TREE_SPACE}")
    } else {
        format!("{prefix}{TREE_PIPE}")
    };

    for (index, child) in children.iter().enumerate() {
        let last_child = index == children.len() - 1;
        render_node(child, children_of, depth + 1, last_child, &child_prefix, output);
    }
}

fn status_marker(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Queued => "·",
        RunStatus::Running => "▶",
        RunStatus::Paused => "⏸",
        RunStatus::Completed => "✓",
        RunStatus::Failed => "✗",
        RunStatus::Cancelled => "⊘",
        RunStatus::TimedOut => "⌛",
    }
}
