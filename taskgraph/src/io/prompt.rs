//! Prompt rendering for node execution, advising, planning and scoring.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

const NODE_TEMPLATE: &str = include_str!("prompts/node.md");
const ADVISOR_TEMPLATE: &str = include_str!("prompts/advisor.md");
const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const EVALUATOR_TEMPLATE: &str = include_str!("prompts/evaluator.md");

/// Tool as presented to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolPrompt {
    pub name: String,
    pub description: String,
    pub schema: String,
}

/// Inputs for one node execution prompt.
#[derive(Debug, Clone)]
pub struct NodePromptInputs<'a> {
    pub context: &'a str,
    pub background: &'a str,
    pub task: &'a str,
    pub node_id: &'a str,
    pub task_description: &'a str,
    pub tool: Option<ToolPrompt>,
}

#[derive(Debug, Clone)]
pub struct AdvisorPromptInputs<'a> {
    pub task: &'a str,
    pub failed_node_id: &'a str,
    pub plan_summary: &'a str,
    pub failure_info: &'a str,
}

#[derive(Debug, Clone)]
pub struct PlannerPromptInputs<'a> {
    pub task: &'a str,
    pub tools: &'a str,
    pub knowledge: &'a str,
    pub categories: &'a [String],
}

#[derive(Debug, Clone)]
pub struct EvaluatorPromptInputs<'a> {
    pub task_description: &'a str,
    pub result: &'a str,
    pub criteria: &'a [String],
    pub context: &'a str,
    pub score_scale: f64,
}

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("node", NODE_TEMPLATE)
        .expect("node template should be valid");
    env.add_template("advisor", ADVISOR_TEMPLATE)
        .expect("advisor template should be valid");
    env.add_template("planner", PLANNER_TEMPLATE)
        .expect("planner template should be valid");
    env.add_template("evaluator", EVALUATOR_TEMPLATE)
        .expect("evaluator template should be valid");
    env
});

fn non_empty(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Builds prompts within a byte budget, dropping optional sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build_node(&self, input: &NodePromptInputs<'_>) -> Result<String> {
        let rendered = ENGINE.get_template("node")?.render(context! {
            context => non_empty(input.context),
            background => non_empty(input.background),
            task => input.task.trim(),
            node_id => input.node_id,
            task_description => input.task_description.trim(),
            tool => input.tool,
        })?;
        Ok(self.fit(&rendered))
    }

    pub fn build_advisor(&self, input: &AdvisorPromptInputs<'_>) -> Result<String> {
        let rendered = ENGINE.get_template("advisor")?.render(context! {
            task => input.task.trim(),
            failed_node_id => input.failed_node_id,
            plan_summary => input.plan_summary.trim(),
            failure_info => input.failure_info.trim(),
        })?;
        Ok(self.fit(&rendered))
    }

    pub fn build_planner(&self, input: &PlannerPromptInputs<'_>) -> Result<String> {
        let rendered = ENGINE.get_template("planner")?.render(context! {
            task => input.task.trim(),
            tools => non_empty(input.tools),
            knowledge => non_empty(input.knowledge),
            categories => input.categories,
        })?;
        Ok(self.fit(&rendered))
    }

    pub fn build_evaluator(&self, input: &EvaluatorPromptInputs<'_>) -> Result<String> {
        let rendered = ENGINE.get_template("evaluator")?.render(context! {
            task_description => input.task_description.trim(),
            result => input.result.trim(),
            criteria => input.criteria,
            context => non_empty(input.context),
            score_scale => input.score_scale,
        })?;
        Ok(self.fit(&rendered))
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }
}

/// A section of rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    /// Required sections are never dropped.
    required: bool,
    content: String,
}

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("section regex should be valid")
    });

    let markers: Vec<_> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((
                whole.start(),
                whole.end(),
                caps.get(1)?.as_str().to_string(),
                caps.get(2)?.as_str() == "required",
            ))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (_, content_start, key, required)) in markers.iter().enumerate() {
        let end = markers
            .get(i + 1)
            .map_or(rendered.len(), |(next_start, ..)| *next_start);
        let content = rendered[*content_start..end].trim().to_string();
        if !content.is_empty() {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

/// Drop optional sections, then truncate the last one, until under `budget`.
///
/// Drop order: context -> background -> knowledge
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    if total_len(sections) <= budget {
        return;
    }

    for key in ["context", "background", "knowledge"] {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let other_len: usize = sections
        .iter()
        .rev()
        .skip(1)
        .map(|s| s.content.len())
        .sum();
    let allowed = budget.saturating_sub(other_len);
    if let Some(last) = sections.last_mut()
        && last.content.len() > allowed
    {
        let before_len = last.content.len();
        let keep = floor_char_boundary(&last.content, allowed.saturating_sub(12));
        last.content.truncate(keep);
        last.content.push_str("\n[truncated]");
        debug!(
            section = last.key,
            before_len,
            after_len = last.content.len(),
            "truncated section for budget"
        );
    }
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
