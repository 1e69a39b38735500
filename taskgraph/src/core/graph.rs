//! The mutable plan graph: nodes, cursor, and replan history.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::core::directive::{ReplanAction, ReplanDirective};
use crate::core::node::{DEFAULT_EVALUATION_THRESHOLD, DEFAULT_MAX_ATTEMPTS, Node};
use crate::core::node_id::NodeId;
use crate::core::tool::ToolRegistry;
use crate::core::types::Step;
use crate::error::PlanningError;

/// Description given to restart nodes the advisor named but never defined.
pub const PLACEHOLDER_RESTART_DESCRIPTION: &str = "Automatically added restart node";

/// One advisor consultation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplanRecord {
    pub timestamp: DateTime<Utc>,
    pub node_id: NodeId,
    pub failure_reason: String,
    /// Advisor reply exactly as received.
    pub advisor_response: String,
}

/// Append-only log of replanning decisions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ReplanHistory {
    records: Vec<ReplanRecord>,
}

impl ReplanHistory {
    pub fn push(&mut self, record: ReplanRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[ReplanRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// How many times the advisor was consulted for `id`.
    pub fn count_for(&self, id: &NodeId) -> usize {
        self.records.iter().filter(|r| &r.node_id == id).count()
    }
}

/// Per-node parameters applied when translating a linear plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeDefaults {
    pub max_attempts: u32,
    pub evaluation_threshold: f64,
}

impl Default for NodeDefaults {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            evaluation_threshold: DEFAULT_EVALUATION_THRESHOLD,
        }
    }
}

/// Score history of one node, used in advisor failure context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeScores {
    pub node_id: NodeId,
    pub results: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default)]
pub struct PlanGraph {
    nodes: BTreeMap<NodeId, Node>,
    start_node_id: Option<NodeId>,
    current_node_id: Option<NodeId>,
    replan_history: ReplanHistory,
}

impl PlanGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate a linear plan into a chain `A → B → …`.
    pub fn from_steps(
        steps: &[Step],
        tools: &ToolRegistry,
        defaults: NodeDefaults,
    ) -> Result<Self, PlanningError> {
        if steps.is_empty() {
            return Err(PlanningError::EmptyPlan);
        }
        let mut graph = Self::new();
        for (idx, step) in steps.iter().enumerate() {
            let mut node = Node::new(NodeId::top_level(idx), step.description.clone());
            if idx + 1 < steps.len() {
                node.next_nodes.push(NodeId::top_level(idx + 1));
            }
            node.uses_tool = step.use_tool;
            node.tool_name = step.tool_name.clone();
            if step.use_tool
                && let Some(name) = &step.tool_name
            {
                node.tool_ref = tools.get(name).cloned();
                if node.tool_ref.is_none() {
                    warn!(node_id = %node.id, tool = %name, "step names an unregistered tool");
                }
            }
            node.category = step.category.clone();
            node.max_attempts = defaults.max_attempts;
            node.evaluation_threshold = defaults.evaluation_threshold;
            graph.add_node(node);
        }
        debug!(nodes = graph.len(), "built plan graph");
        Ok(graph)
    }

    /// Insert a node. The first node added becomes the start node and cursor.
    pub fn add_node(&mut self, node: Node) {
        if self.start_node_id.is_none() {
            self.start_node_id = Some(node.id.clone());
            self.current_node_id = Some(node.id.clone());
        }
        if self.nodes.contains_key(&node.id) {
            warn!(node_id = %node.id, "replacing existing node");
        }
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn remove_node(&mut self, id: &NodeId) -> Option<Node> {
        self.nodes.remove(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in tree order of their ids.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn start_node_id(&self) -> Option<&NodeId> {
        self.start_node_id.as_ref()
    }

    pub fn current_node_id(&self) -> Option<&NodeId> {
        self.current_node_id.as_ref()
    }

    pub fn set_cursor(&mut self, id: NodeId) {
        self.current_node_id = Some(id);
    }

    pub fn replan_history(&self) -> &ReplanHistory {
        &self.replan_history
    }

    pub fn record_replan(&mut self, node_id: &NodeId, failure_reason: &str, advisor_response: &str) {
        self.replan_history.push(ReplanRecord {
            timestamp: Utc::now(),
            node_id: node_id.clone(),
            failure_reason: failure_reason.to_string(),
            advisor_response: advisor_response.to_string(),
        });
    }

    /// One `Node <id>: <desc>, Next: [...]` line per node.
    pub fn summarize_plan(&self) -> String {
        self.nodes
            .values()
            .map(|node| {
                let next = node
                    .next_nodes
                    .iter()
                    .map(NodeId::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("Node {}: {}, Next: [{}]", node.id, node.task_description, next)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn score_history(&self) -> Vec<NodeScores> {
        self.nodes
            .values()
            .map(|node| NodeScores {
                node_id: node.id.clone(),
                results: node.score_history(),
            })
            .collect()
    }

    /// Failure context handed to the advisor.
    pub fn failure_info(&self, failure_reason: &str) -> Value {
        json!({
            "failure_reason": failure_reason,
            "execution_history": self.score_history(),
            "replan_history": self.replan_history,
        })
    }

    /// Apply the structural change proposed for `failed`.
    ///
    /// Subtask ids must already be assigned; subtasks without one are skipped.
    pub fn apply_directive(&mut self, failed: &NodeId, directive: &ReplanDirective) {
        match directive.action() {
            ReplanAction::Breakdown => self.break_down(failed, directive),
            ReplanAction::Replan => self.rewind(failed, directive),
            ReplanAction::Unknown(action) => {
                warn!(node_id = %failed, action = %action, "unknown replan action, graph unchanged");
            }
        }
    }

    fn break_down(&mut self, failed: &NodeId, directive: &ReplanDirective) {
        let subtasks = directive.subtask_nodes();
        let Some(first) = subtasks.first().map(|node| node.id.clone()) else {
            warn!(node_id = %failed, "breakdown without subtasks, graph unchanged");
            return;
        };

        self.nodes.remove(failed);
        for node in subtasks {
            self.add_node(node);
        }
        for node in self.nodes.values_mut() {
            for next in &mut node.next_nodes {
                if next == failed {
                    *next = first.clone();
                }
            }
        }
        if self.start_node_id.as_ref() == Some(failed) {
            self.start_node_id = Some(first.clone());
        }
        info!(node_id = %failed, first = %first, "broke node down into subtasks");
    }

    /// Apply modifications, then give every node between the restart and
    /// `failed` a fresh attempt budget.
    fn rewind(&mut self, failed: &NodeId, directive: &ReplanDirective) {
        for modification in &directive.modifications {
            match self.nodes.get_mut(&modification.node_id) {
                Some(node) => modification.apply_to(node),
                None => self.add_node(modification.to_node()),
            }
        }
        let Some(restart) = &directive.restart_node_id else {
            return;
        };
        if !self.contains(restart) {
            warn!(node_id = %restart, "restart node missing, adding placeholder");
            self.add_node(Node::new(restart.clone(), PLACEHOLDER_RESTART_DESCRIPTION));
        }
        for node in self.nodes.values_mut() {
            if node.current_attempts > 0 && node.id.in_range(restart, failed) {
                debug!(node_id = %node.id, attempts = node.current_attempts, "reset attempts on rewind");
                node.current_attempts = 0;
            }
        }
    }

    /// Node the loop resumes from after `directive` was applied.
    pub fn resolve_restart(&self, directive: &ReplanDirective) -> Result<NodeId, PlanningError> {
        match directive.requested_restart() {
            Some(id) if self.contains(id) => Ok(id.clone()),
            requested => Err(PlanningError::UnresolvableRestart {
                action: directive.action().as_str().to_string(),
                requested: requested.map_or_else(|| "none".to_string(), NodeId::to_string),
            }),
        }
    }
}

/// Far end of the context range invalidated by `directive`.
pub fn prune_target(failed: &NodeId, directive: &ReplanDirective) -> NodeId {
    directive
        .requested_restart()
        .cloned()
        .unwrap_or_else(|| failed.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tool::ToolRef;
    use crate::test_support::{EchoTool, linear_graph, linear_graph_with_attempts};

    #[test]
    fn from_steps_builds_a_linear_chain() {
        let mut steps = vec![Step::new("one", "first"), Step::new("two", "second")];
        steps[1].use_tool = true;
        steps[1].tool_name = Some("echo".to_string());
        steps[1].category = "coding".to_string();

        let mut tools = ToolRegistry::new();
        tools.register(ToolRef::new(EchoTool));
        let defaults = NodeDefaults {
            max_attempts: 5,
            evaluation_threshold: 0.7,
        };
        let graph = PlanGraph::from_steps(&steps, &tools, defaults).expect("graph");

        let a = graph.node(&NodeId::from("A")).expect("A");
        assert_eq!(a.next_nodes, vec![NodeId::from("B")]);
        assert_eq!(a.max_attempts, 5);
        let b = graph.node(&NodeId::from("B")).expect("B");
        assert!(b.next_nodes.is_empty());
        assert!(b.tool_ref.is_some());
        assert_eq!(b.category, "coding");
        assert_eq!(graph.start_node_id(), Some(&NodeId::from("A")));
        assert_eq!(graph.current_node_id(), Some(&NodeId::from("A")));
    }

    #[test]
    fn unknown_tool_leaves_uses_tool_set() {
        let mut step = Step::new("one", "first");
        step.use_tool = true;
        step.tool_name = Some("nope".to_string());
        let graph =
            PlanGraph::from_steps(&[step], &ToolRegistry::new(), NodeDefaults::default())
                .expect("graph");
        let a = graph.node(&NodeId::from("A")).expect("A");
        assert!(a.uses_tool);
        assert!(a.tool_ref.is_none());
    }

    #[test]
    fn empty_plan_is_rejected() {
        let err = PlanGraph::from_steps(&[], &ToolRegistry::new(), NodeDefaults::default())
            .expect_err("empty");
        assert_eq!(err.code(), "empty_plan");
    }

    #[test]
    fn ids_past_z_keep_tree_order() {
        let steps: Vec<Step> = (0..28).map(|i| Step::new(format!("s{i}"), "x")).collect();
        let graph =
            PlanGraph::from_steps(&steps, &ToolRegistry::new(), NodeDefaults::default())
                .expect("graph");
        let z = graph.node(&NodeId::from("Z")).expect("Z");
        assert_eq!(z.next_nodes, vec![NodeId::from("AA")]);
        let last = graph.nodes().last().expect("last");
        assert_eq!(last.id, NodeId::from("AB"));
    }

    #[test]
    fn summary_lists_nodes_in_order() {
        let graph = linear_graph(&["A", "B"]);
        assert_eq!(
            graph.summarize_plan(),
            "Node A: task A, Next: [B]\nNode B: task B, Next: []"
        );
    }

    #[test]
    fn breakdown_replaces_node_and_links() {
        let mut graph = linear_graph(&["A", "B", "C"]);
        let mut directive = ReplanDirective::parse(
            r#"{"action":"breakdown","new_subtasks":[
                {"task_description":"half one","next_nodes":["B.2"]},
                {"task_description":"half two"}
            ]}"#,
        )
        .expect("parse");
        let failed = NodeId::from("B");
        directive.assign_missing_subtask_ids(&failed);
        graph.apply_directive(&failed, &directive);

        assert!(!graph.contains(&failed));
        assert_eq!(
            graph.node(&NodeId::from("A")).expect("A").next_nodes,
            vec![NodeId::from("B.1")]
        );
        assert_eq!(
            graph.node(&NodeId::from("B.1")).expect("B.1").next_nodes,
            vec![NodeId::from("B.2")]
        );
        assert!(graph.node(&NodeId::from("B.2")).expect("B.2").next_nodes.is_empty());
        assert_eq!(graph.resolve_restart(&directive).expect("restart"), NodeId::from("B.1"));
        assert_eq!(prune_target(&failed, &directive), NodeId::from("B.1"));
    }

    #[test]
    fn breaking_down_the_start_node_moves_start() {
        let mut graph = linear_graph(&["A", "B"]);
        let failed = NodeId::from("A");
        let mut directive =
            ReplanDirective::parse(r#"{"action":"breakdown","new_subtasks":[{"task_description":"x"}]}"#)
                .expect("parse");
        directive.assign_missing_subtask_ids(&failed);
        graph.apply_directive(&failed, &directive);
        assert_eq!(graph.start_node_id(), Some(&NodeId::from("A.1")));
    }

    #[test]
    fn rewind_resets_and_overwrites_supplied_fields() {
        let mut graph = linear_graph(&["A", "B", "C"]);
        {
            let b = graph.node_mut(&NodeId::from("B")).expect("B");
            b.current_attempts = 2;
            b.max_attempts = 4;
        }
        let directive = ReplanDirective::parse(
            r#"{"action":"replan","restart_node_id":"B","modifications":[{"node_id":"B","task_description":"revised"}]}"#,
        )
        .expect("parse");
        graph.apply_directive(&NodeId::from("C"), &directive);

        let b = graph.node(&NodeId::from("B")).expect("B");
        assert_eq!(b.task_description, "revised");
        assert_eq!(b.current_attempts, 0);
        assert_eq!(b.max_attempts, 4);
        assert_eq!(b.next_nodes, vec![NodeId::from("C")]);
        assert_eq!(graph.resolve_restart(&directive).expect("restart"), NodeId::from("B"));
    }

    #[test]
    fn rewind_resets_attempts_between_restart_and_failed_node() {
        let mut graph = linear_graph_with_attempts(&["A", "B", "C", "D"], 2);
        for id in ["A", "B", "C", "D"] {
            graph.node_mut(&NodeId::from(id)).expect("node").current_attempts = 2;
        }
        let directive =
            ReplanDirective::parse(r#"{"action":"replan","restart_node_id":"B"}"#).expect("parse");
        graph.apply_directive(&NodeId::from("C"), &directive);

        let attempts = |id: &str| graph.node(&NodeId::from(id)).expect("node").current_attempts;
        assert_eq!(attempts("A"), 2);
        assert_eq!(attempts("B"), 0);
        assert_eq!(attempts("C"), 0);
        assert_eq!(attempts("D"), 2);
    }

    #[test]
    fn rewind_creates_missing_nodes_and_placeholder_restart() {
        let mut graph = linear_graph(&["A"]);
        let directive = ReplanDirective::parse(
            r#"{"action":"replan","restart_node_id":"Q","modifications":[{"node_id":"N","next_nodes":["A"]}]}"#,
        )
        .expect("parse");
        graph.apply_directive(&NodeId::from("A"), &directive);

        let n = graph.node(&NodeId::from("N")).expect("N");
        assert_eq!(n.task_description, "No description");
        assert_eq!(n.next_nodes, vec![NodeId::from("A")]);
        let q = graph.node(&NodeId::from("Q")).expect("Q");
        assert_eq!(q.task_description, PLACEHOLDER_RESTART_DESCRIPTION);
        assert_eq!(graph.resolve_restart(&directive).expect("restart"), NodeId::from("Q"));
    }

    #[test]
    fn unknown_action_changes_nothing_and_cannot_resolve() {
        let mut graph = linear_graph(&["A", "B"]);
        let before = graph.summarize_plan();
        let directive = ReplanDirective::parse(r#"{"action":"mystery"}"#).expect("parse");
        graph.apply_directive(&NodeId::from("B"), &directive);

        assert_eq!(graph.summarize_plan(), before);
        let err = graph.resolve_restart(&directive).expect_err("unresolved");
        assert_eq!(err.code(), "unresolvable_restart");
        assert_eq!(prune_target(&NodeId::from("B"), &directive), NodeId::from("B"));
    }

    #[test]
    fn failure_info_carries_scores_and_history() {
        let mut graph = linear_graph(&["A"]);
        graph
            .node_mut(&NodeId::from("A"))
            .expect("A")
            .record_score("out", 0.25, Utc::now());
        graph.record_replan(&NodeId::from("A"), "too low", "{\"action\":\"replan\"}");

        let info = graph.failure_info("too low");
        assert_eq!(info["failure_reason"], "too low");
        assert_eq!(info["execution_history"][0]["node_id"], "A");
        assert_eq!(info["execution_history"][0]["results"][0], 0.25);
        assert_eq!(info["replan_history"][0]["node_id"], "A");
        assert_eq!(graph.replan_history().count_for(&NodeId::from("A")), 1);
    }
}
