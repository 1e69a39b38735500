use thiserror::Error;

use crate::core::node_id::NodeId;

/// Which model reply failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStage {
    /// A node execution reply (`use_tool` decision).
    NodeReply,
    /// A replanning advisor reply.
    AdvisorReply,
    /// A linear planner reply.
    PlanReply,
    /// An evaluator reply.
    EvaluatorReply,
}

impl ParseStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ParseStage::NodeReply => "node reply",
            ParseStage::AdvisorReply => "advisor reply",
            ParseStage::PlanReply => "plan reply",
            ParseStage::EvaluatorReply => "evaluator reply",
        }
    }
}

/// Errors that end a planning run.
#[derive(Error, Debug)]
pub enum PlanningError {
    #[error("failed to parse {}: {message}", stage.as_str())]
    Parse { stage: ParseStage, message: String },

    #[error("node '{0}' does not exist in the plan")]
    MissingNode(NodeId),

    #[error("cannot resolve restart node after '{action}' (requested: {requested})")]
    UnresolvableRestart { action: String, requested: String },

    #[error("replan budget of {0} exhausted")]
    ReplanBudgetExhausted(u32),

    #[error("step budget of {0} node executions exhausted")]
    StepBudgetExhausted(u32),

    #[error("plan has no steps")]
    EmptyPlan,

    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error("model backend failed: {0:#}")]
    Backend(#[source] anyhow::Error),

    #[error("tool '{tool}' failed: {source:#}")]
    Tool {
        tool: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("evaluator for category '{category}' failed: {source:#}")]
    Evaluator {
        category: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PlanningError {
    pub(crate) fn parse(stage: ParseStage, message: impl Into<String>) -> Self {
        PlanningError::Parse {
            stage,
            message: message.into(),
        }
    }

    /// Stable reason code for reports and exit handling.
    pub fn code(&self) -> &'static str {
        match self {
            PlanningError::Parse { .. } => "parse_error",
            PlanningError::MissingNode(_) => "missing_node",
            PlanningError::UnresolvableRestart { .. } => "unresolvable_restart",
            PlanningError::ReplanBudgetExhausted(_) => "replan_budget_exhausted",
            PlanningError::StepBudgetExhausted(_) => "step_budget_exhausted",
            PlanningError::EmptyPlan => "empty_plan",
            PlanningError::UnknownModel(_) => "unknown_model",
            PlanningError::Backend(_) => "backend_error",
            PlanningError::Tool { .. } => "tool_error",
            PlanningError::Evaluator { .. } => "evaluator_error",
        }
    }

    /// True for aborts decided by the planner itself rather than a failing collaborator.
    pub fn is_plan_abort(&self) -> bool {
        matches!(
            self,
            PlanningError::Parse {
                stage: ParseStage::AdvisorReply,
                ..
            } | PlanningError::MissingNode(_)
                | PlanningError::UnresolvableRestart { .. }
                | PlanningError::ReplanBudgetExhausted(_)
                | PlanningError::StepBudgetExhausted(_)
        )
    }
}
