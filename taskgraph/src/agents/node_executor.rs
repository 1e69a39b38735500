//! Executes a single plan node against a model backend.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::context::{ContextKey, ContextStore};
use crate::core::node::{MISSING_TOOL_RESULT, Node};
use crate::core::reply::parse_json_reply;
use crate::error::{ParseStage, PlanningError};
use crate::io::backend::ModelBackend;
use crate::io::prompt::{NodePromptInputs, PromptBuilder, ToolPrompt};

/// What the model decided to do with a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeAction {
    Respond(String),
    CallTool {
        tool_name: Option<String>,
        arguments: Value,
    },
}

#[derive(Debug, Deserialize)]
struct NodeReply {
    use_tool: Option<bool>,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    tool_arguments: Value,
    #[serde(default)]
    response: Option<Value>,
}

/// Parse a node reply into the action it requests.
pub fn parse_node_reply(raw: &str) -> Result<NodeAction, PlanningError> {
    let reply: NodeReply = parse_json_reply(raw, ParseStage::NodeReply)?;
    match reply.use_tool {
        None => Err(PlanningError::parse(
            ParseStage::NodeReply,
            "reply is missing the `use_tool` key",
        )),
        Some(true) => Ok(NodeAction::CallTool {
            tool_name: reply.tool_name,
            arguments: reply.tool_arguments,
        }),
        Some(false) => match reply.response {
            Some(Value::String(text)) => Ok(NodeAction::Respond(text)),
            Some(Value::Null) | None => Err(PlanningError::parse(
                ParseStage::NodeReply,
                "reply has `use_tool: false` but no `response`",
            )),
            Some(other) => Ok(NodeAction::Respond(other.to_string())),
        },
    }
}

/// Task-level text shared by every node prompt of a run.
#[derive(Debug, Clone, Copy)]
pub struct TaskContext<'a> {
    pub task: &'a str,
    pub background: &'a str,
}

/// Runs one attempt of a node.
#[derive(Debug, Clone)]
pub struct NodeAgent {
    prompts: PromptBuilder,
}

impl NodeAgent {
    pub fn new(prompts: PromptBuilder) -> Self {
        Self { prompts }
    }

    /// Execute `node` once and return its raw result.
    ///
    /// Increments the attempt counter, stores the result under the node's
    /// previous-step context key and appends it to the execution log.
    #[instrument(skip_all, fields(node_id = %node.id))]
    pub fn execute(
        &self,
        backend: &dyn ModelBackend,
        node: &mut Node,
        task: TaskContext<'_>,
        context: &mut ContextStore,
    ) -> Result<String, PlanningError> {
        let attempt = node.begin_attempt();
        info!(attempt, "executing node");

        let tool = node
            .tool_ref
            .as_ref()
            .filter(|_| node.uses_tool)
            .map(|tool| ToolPrompt {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                schema: tool.prompt_description(),
            });
        let rendered_context = context.render();
        let prompt = self
            .prompts
            .build_node(&NodePromptInputs {
                context: &rendered_context,
                background: task.background,
                task: task.task,
                node_id: node.id.as_str(),
                task_description: &node.task_description,
                tool,
            })
            .map_err(PlanningError::Backend)?;

        let raw = backend.process(&prompt).map_err(PlanningError::Backend)?;
        debug!(reply = %raw, "node reply");

        let result = match parse_node_reply(&raw)? {
            NodeAction::Respond(text) => text,
            NodeAction::CallTool {
                tool_name,
                arguments,
            } => match &node.tool_ref {
                Some(tool) => {
                    if let Some(requested) = &tool_name
                        && requested != tool.name()
                    {
                        debug!(requested = %requested, attached = %tool.name(), "using attached tool");
                    }
                    let value = tool
                        .invoke(&arguments)
                        .map_err(|source| PlanningError::Tool {
                            tool: tool.name().to_string(),
                            source,
                        })?;
                    let value = match value {
                        Value::String(text) => text,
                        other => other.to_string(),
                    };
                    format!("Tool {}: {}\nResult: {}", tool.name(), tool.description(), value)
                }
                None => {
                    warn!(tool = ?tool_name, "tool requested but none attached");
                    MISSING_TOOL_RESULT.to_string()
                }
            },
        };

        context.add(
            ContextKey::PreviousStep(node.id.clone()),
            format!(
                "Task description: {}\nTask response: {}",
                node.task_description, result
            ),
        );
        node.record_raw(result.clone());
        Ok(result)
    }
}
