//! Linear planner: turns a task into a flat list of steps.

use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::core::reply::strip_code_fences;
use crate::core::tool::ToolRegistry;
use crate::core::types::{DEFAULT_CATEGORY, Step};
use crate::error::{ParseStage, PlanningError};
use crate::io::backend::ModelBackend;
use crate::io::prompt::{PlannerPromptInputs, PromptBuilder};

#[derive(Debug, Clone)]
pub struct LinearPlanner {
    prompts: PromptBuilder,
}

impl LinearPlanner {
    pub fn new(prompts: PromptBuilder) -> Self {
        Self { prompts }
    }

    #[instrument(skip_all, fields(categories = categories.len()))]
    pub fn plan(
        &self,
        backend: &dyn ModelBackend,
        task: &str,
        tools: &ToolRegistry,
        knowledge: &str,
        categories: &[String],
    ) -> Result<Vec<Step>, PlanningError> {
        let prompt = self
            .prompts
            .build_planner(&PlannerPromptInputs {
                task,
                tools: &tools.describe(),
                knowledge,
                categories,
            })
            .map_err(PlanningError::Backend)?;
        let raw = backend.process(&prompt).map_err(PlanningError::Backend)?;
        let steps = parse_plan_reply(&raw, categories)?;
        info!(steps = steps.len(), "linear plan ready");
        Ok(steps)
    }
}

/// Parse a `{"steps": [...]}` reply, keeping only well-formed steps.
pub fn parse_plan_reply(raw: &str, categories: &[String]) -> Result<Vec<Step>, PlanningError> {
    let cleaned = strip_code_fences(raw);
    if cleaned.is_empty() {
        return Err(PlanningError::parse(ParseStage::PlanReply, "empty reply"));
    }
    let value: Value = serde_json::from_str(&cleaned)
        .map_err(|err| PlanningError::parse(ParseStage::PlanReply, err.to_string()))?;
    let entries = match &value {
        Value::Object(map) => map.get("steps").and_then(Value::as_array),
        Value::Array(items) => Some(items),
        _ => None,
    }
    .ok_or_else(|| PlanningError::parse(ParseStage::PlanReply, "reply has no `steps` array"))?;

    let mut steps = Vec::new();
    for (idx, entry) in entries.iter().enumerate() {
        let text = |key: &str| {
            entry
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };
        let (Some(name), Some(description)) = (text("step_name"), text("step_description")) else {
            warn!(index = idx, "skipping step without name or description");
            continue;
        };
        let mut step = Step::new(name, description);
        step.use_tool = entry
            .get("use_tool")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        step.tool_name = text("tool_name").map(str::to_string);
        if let Some(category) = text("step_category") {
            if categories.iter().any(|c| c == category) {
                step.category = category.to_string();
            } else {
                warn!(index = idx, category, "unknown step category, using default");
                step.category = DEFAULT_CATEGORY.to_string();
            }
        }
        steps.push(step);
    }

    if steps.is_empty() {
        return Err(PlanningError::EmptyPlan);
    }
    Ok(steps)
}
