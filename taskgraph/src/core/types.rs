//! Shared plain-data types for the planning core.

use serde::{Deserialize, Serialize};

/// Category used when a step or subtask does not name one.
pub const DEFAULT_CATEGORY: &str = "default";

/// One entry of a linear plan, before it becomes a graph node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "step_name", alias = "name")]
    pub name: String,
    #[serde(rename = "step_description", alias = "description")]
    pub description: String,
    #[serde(default)]
    pub use_tool: bool,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default = "default_category", rename = "step_category", alias = "category")]
    pub category: String,
}

impl Step {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            use_tool: false,
            tool_name: None,
            category: default_category(),
        }
    }
}

pub(crate) fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

/// A node that reached its threshold, as recorded by the control loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedStep {
    pub name: String,
    pub description: String,
    pub result: String,
}

/// Ordered record of completed steps for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionHistory {
    steps: Vec<CompletedStep>,
}

impl ExecutionHistory {
    pub fn push(&mut self, step: CompletedStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[CompletedStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Human-readable listing, one numbered block per step.
    pub fn render(&self) -> String {
        self.steps
            .iter()
            .enumerate()
            .map(|(idx, step)| {
                format!(
                    "Step {}: {}\nDescription: {}\nResult: {}\n",
                    idx + 1,
                    step.name,
                    step.description,
                    step.result
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
