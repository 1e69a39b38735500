//! Plan nodes and their retry/evaluation bookkeeping.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::node_id::NodeId;
use crate::core::tool::ToolRef;
use crate::core::types::default_category;

pub const DEFAULT_EVALUATION_THRESHOLD: f64 = 0.9;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Result returned when the model asks for a tool the node does not carry.
pub const MISSING_TOOL_RESULT: &str =
    "Tool usage was requested, but no tool is attached to this node.";

/// A scored execution outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredResult {
    pub output: String,
    pub evaluation_score: f64,
    pub timestamp: DateTime<Utc>,
}

/// One entry of a node's execution log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExecutionRecord {
    /// Output produced by an attempt that has not been scored yet.
    Raw(String),
    Scored(ScoredResult),
}

impl ExecutionRecord {
    pub fn score(&self) -> Option<f64> {
        match self {
            ExecutionRecord::Raw(_) => None,
            ExecutionRecord::Scored(result) => Some(result.evaluation_score),
        }
    }
}

/// One unit of planned work.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub task_description: String,
    /// Successor ids. Only the first entry is followed.
    pub next_nodes: Vec<NodeId>,
    pub uses_tool: bool,
    pub tool_name: Option<String>,
    #[serde(skip)]
    pub tool_ref: Option<ToolRef>,
    pub category: String,
    pub execution_results: Vec<ExecutionRecord>,
    pub evaluation_threshold: f64,
    pub max_attempts: u32,
    pub current_attempts: u32,
    pub failed_reasons: Vec<String>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, task_description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_description: task_description.into(),
            next_nodes: Vec::new(),
            uses_tool: false,
            tool_name: None,
            tool_ref: None,
            category: default_category(),
            execution_results: Vec::new(),
            evaluation_threshold: DEFAULT_EVALUATION_THRESHOLD,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            current_attempts: 0,
            failed_reasons: Vec::new(),
        }
    }

    /// Successor the control loop follows, if any.
    pub fn next(&self) -> Option<&NodeId> {
        self.next_nodes.first()
    }

    pub fn set_next_node(&mut self, id: &NodeId) {
        if !self.next_nodes.contains(id) {
            self.next_nodes.push(id.clone());
        }
    }

    /// Start an attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.current_attempts += 1;
        self.current_attempts
    }

    pub fn record_raw(&mut self, output: impl Into<String>) {
        self.execution_results
            .push(ExecutionRecord::Raw(output.into()));
    }

    /// Record a score for `output`.
    ///
    /// A trailing unscored entry for the same output is wrapped in place, so
    /// an attempt leaves exactly one entry behind.
    pub fn record_score(&mut self, output: &str, score: f64, timestamp: DateTime<Utc>) {
        let scored = ExecutionRecord::Scored(ScoredResult {
            output: output.to_string(),
            evaluation_score: score,
            timestamp,
        });
        if let Some(last) = self.execution_results.last_mut()
            && matches!(&*last, ExecutionRecord::Raw(raw) if raw == output)
        {
            *last = scored;
            return;
        }
        self.execution_results.push(scored);
    }

    /// Score of the most recent entry, if it was scored.
    pub fn last_score(&self) -> Option<f64> {
        self.execution_results.last().and_then(ExecutionRecord::score)
    }

    /// All recorded scores in order; unscored entries appear as `None`.
    pub fn score_history(&self) -> Vec<Option<f64>> {
        self.execution_results
            .iter()
            .map(ExecutionRecord::score)
            .collect()
    }

    pub fn passes(&self, score: f64) -> bool {
        score >= self.evaluation_threshold
    }

    /// Attempts used up and the latest score still below threshold.
    pub fn is_exhausted(&self) -> bool {
        match self.last_score() {
            Some(score) => !self.passes(score) && self.current_attempts >= self.max_attempts,
            None => false,
        }
    }

    /// Record why the node is being handed to the advisor and return the reason.
    pub fn record_exhaustion(&mut self) -> String {
        let reason = format!(
            "Node {} failed to reach threshold after {} attempts.",
            self.id, self.max_attempts
        );
        self.failed_reasons.push(reason.clone());
        reason
    }

    pub fn last_failure_reason(&self) -> Option<&str> {
        self.failed_reasons.last().map(String::as_str)
    }
}

/// Decide whether the node must go to the advisor instead of retrying.
pub fn should_replan(node: &Node) -> bool {
    node.is_exhausted()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(node: &mut Node, output: &str, score: f64) {
        node.begin_attempt();
        node.record_raw(output);
        node.record_score(output, score, Utc::now());
    }

    #[test]
    fn new_node_uses_defaults() {
        let node = Node::new("A", "do it");
        assert_eq!(node.category, "default");
        assert_eq!(node.evaluation_threshold, 0.9);
        assert_eq!(node.max_attempts, 3);
        assert_eq!(node.current_attempts, 0);
        assert!(node.next().is_none());
    }

    #[test]
    fn set_next_node_ignores_duplicates() {
        let mut node = Node::new("A", "do it");
        node.set_next_node(&NodeId::from("B"));
        node.set_next_node(&NodeId::from("B"));
        assert_eq!(node.next_nodes, vec![NodeId::from("B")]);
    }

    #[test]
    fn scoring_wraps_the_raw_entry() {
        let mut node = Node::new("A", "do it");
        scored(&mut node, "first", 0.2);
        scored(&mut node, "second", 0.95);

        assert_eq!(node.execution_results.len(), 2);
        assert_eq!(node.score_history(), vec![Some(0.2), Some(0.95)]);
        assert_eq!(node.last_score(), Some(0.95));
    }

    #[test]
    fn scoring_without_raw_entry_appends() {
        let mut node = Node::new("A", "do it");
        node.record_raw("unrelated");
        node.record_score("other", 1.0, Utc::now());
        assert_eq!(node.score_history(), vec![None, Some(1.0)]);
    }

    #[test]
    fn exhaustion_requires_low_score_and_spent_attempts() {
        let mut node = Node::new("A", "do it");
        node.max_attempts = 2;

        scored(&mut node, "x", 0.5);
        assert!(!should_replan(&node));

        scored(&mut node, "y", 0.5);
        assert!(should_replan(&node));

        let mut passing = Node::new("B", "do it");
        passing.max_attempts = 1;
        scored(&mut passing, "z", 0.9);
        assert!(!should_replan(&passing));
    }

    #[test]
    fn single_attempt_node_replans_after_first_failure() {
        let mut node = Node::new("A", "do it");
        node.max_attempts = 1;
        scored(&mut node, "x", 0.1);
        assert!(should_replan(&node));
    }

    #[test]
    fn unscored_node_never_replans() {
        let mut node = Node::new("A", "do it");
        node.max_attempts = 1;
        node.begin_attempt();
        node.record_raw("pending");
        assert!(!should_replan(&node));
    }

    #[test]
    fn exhaustion_reason_is_recorded() {
        let mut node = Node::new("C", "do it");
        let reason = node.record_exhaustion();
        assert_eq!(reason, "Node C failed to reach threshold after 3 attempts.");
        assert_eq!(node.last_failure_reason(), Some(reason.as_str()));
    }
}
