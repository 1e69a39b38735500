//! Structural changes proposed by the replanning advisor.

use serde::{Deserialize, Serialize};

use crate::core::node::{DEFAULT_EVALUATION_THRESHOLD, DEFAULT_MAX_ATTEMPTS, Node};
use crate::core::node_id::NodeId;
use crate::core::reply::parse_json_reply;
use crate::core::types::default_category;
use crate::error::{ParseStage, PlanningError};

/// Kind of change the advisor asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplanAction {
    /// Replace the failed node with a chain of subtasks.
    Breakdown,
    /// Rewind to an earlier node, optionally modifying nodes first.
    Replan,
    Unknown(String),
}

impl ReplanAction {
    pub fn as_str(&self) -> &str {
        match self {
            ReplanAction::Breakdown => "breakdown",
            ReplanAction::Replan => "replan",
            ReplanAction::Unknown(other) => other,
        }
    }
}

/// A node the advisor wants to insert during a breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskSpec {
    #[serde(default)]
    pub id: Option<NodeId>,
    #[serde(default)]
    pub task_description: Option<String>,
    #[serde(default)]
    pub next_nodes: Vec<NodeId>,
    #[serde(default)]
    pub evaluation_threshold: Option<f64>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default, alias = "step_category")]
    pub category: Option<String>,
}

impl SubtaskSpec {
    fn into_node(self, id: NodeId) -> Node {
        let mut node = Node::new(
            id,
            self.task_description
                .unwrap_or_else(|| "No description provided.".to_string()),
        );
        node.next_nodes = self.next_nodes;
        node.evaluation_threshold = self
            .evaluation_threshold
            .unwrap_or(DEFAULT_EVALUATION_THRESHOLD);
        node.max_attempts = self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        node.category = self.category.unwrap_or_else(default_category);
        node
    }
}

/// Field overrides for an existing (or new) node during a rewind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeModification {
    pub node_id: NodeId,
    #[serde(default)]
    pub task_description: Option<String>,
    #[serde(default)]
    pub next_nodes: Option<Vec<NodeId>>,
    #[serde(default)]
    pub evaluation_threshold: Option<f64>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default, alias = "step_category")]
    pub category: Option<String>,
}

impl NodeModification {
    /// Overwrite the supplied fields and reset the attempt counter.
    pub fn apply_to(&self, node: &mut Node) {
        node.current_attempts = 0;
        if let Some(description) = &self.task_description {
            node.task_description = description.clone();
        }
        if let Some(next) = &self.next_nodes {
            node.next_nodes = next.clone();
        }
        if let Some(threshold) = self.evaluation_threshold {
            node.evaluation_threshold = threshold;
        }
        if let Some(max_attempts) = self.max_attempts {
            node.max_attempts = max_attempts;
        }
        if let Some(category) = &self.category {
            node.category = category.clone();
        }
    }

    /// Build a fresh node from the supplied fields.
    pub fn to_node(&self) -> Node {
        let mut node = Node::new(
            self.node_id.clone(),
            self.task_description
                .clone()
                .unwrap_or_else(|| "No description".to_string()),
        );
        node.next_nodes = self.next_nodes.clone().unwrap_or_default();
        node.evaluation_threshold = self
            .evaluation_threshold
            .unwrap_or(DEFAULT_EVALUATION_THRESHOLD);
        node.max_attempts = self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        node.category = self.category.clone().unwrap_or_else(default_category);
        node
    }
}

/// Parsed advisor reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplanDirective {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub new_subtasks: Vec<SubtaskSpec>,
    #[serde(default)]
    pub restart_node_id: Option<NodeId>,
    #[serde(default)]
    pub modifications: Vec<NodeModification>,
    #[serde(default)]
    pub rationale: Option<String>,
}

impl ReplanDirective {
    /// Parse an advisor reply, tolerating Markdown fences.
    pub fn parse(raw: &str) -> Result<Self, PlanningError> {
        parse_json_reply(raw, ParseStage::AdvisorReply)
    }

    pub fn action(&self) -> ReplanAction {
        match self.action.trim().to_ascii_lowercase().as_str() {
            "breakdown" => ReplanAction::Breakdown,
            "replan" => ReplanAction::Replan,
            _ => ReplanAction::Unknown(self.action.clone()),
        }
    }

    /// Give subtasks without an id a child id of the failed node (`B` → `B.1`, `B.2`).
    pub fn assign_missing_subtask_ids(&mut self, failed: &NodeId) {
        for (idx, subtask) in self.new_subtasks.iter_mut().enumerate() {
            if subtask.id.is_none() {
                subtask.id = Some(failed.child(idx as u32 + 1));
            }
        }
    }

    /// Node id the cursor should move to, before checking it exists.
    pub fn requested_restart(&self) -> Option<&NodeId> {
        match self.action() {
            ReplanAction::Replan => self.restart_node_id.as_ref(),
            ReplanAction::Breakdown => self.new_subtasks.first().and_then(|s| s.id.as_ref()),
            ReplanAction::Unknown(_) => None,
        }
    }

    /// Subtasks turned into nodes, skipping entries without an id.
    pub(crate) fn subtask_nodes(&self) -> Vec<Node> {
        self.new_subtasks
            .iter()
            .filter_map(|spec| {
                let id = spec.id.clone()?;
                Some(spec.clone().into_node(id))
            })
            .collect()
    }
}
