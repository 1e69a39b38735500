//! Replanning advisor: asks the model how to restructure a failing plan.

use tracing::{debug, info, instrument};

use crate::core::directive::ReplanDirective;
use crate::core::graph::PlanGraph;
use crate::core::node_id::NodeId;
use crate::error::PlanningError;
use crate::io::backend::ModelBackend;
use crate::io::prompt::{AdvisorPromptInputs, PromptBuilder};

/// Advisor reply as received plus its parsed form.
#[derive(Debug, Clone)]
pub struct AdvisorReply {
    pub raw: String,
    pub directive: ReplanDirective,
}

#[derive(Debug, Clone)]
pub struct ReplanAdvisor {
    prompts: PromptBuilder,
}

impl ReplanAdvisor {
    pub fn new(prompts: PromptBuilder) -> Self {
        Self { prompts }
    }

    /// One advisor completion for the exhausted node `failed`.
    #[instrument(skip_all, fields(node_id = %failed))]
    pub fn advise(
        &self,
        backend: &dyn ModelBackend,
        task: &str,
        graph: &PlanGraph,
        failed: &NodeId,
        failure_reason: &str,
    ) -> Result<AdvisorReply, PlanningError> {
        let failure_info = serde_json::to_string_pretty(&graph.failure_info(failure_reason))
            .map_err(|err| PlanningError::Backend(err.into()))?;
        let plan_summary = graph.summarize_plan();
        let prompt = self
            .prompts
            .build_advisor(&AdvisorPromptInputs {
                task,
                failed_node_id: failed.as_str(),
                plan_summary: &plan_summary,
                failure_info: &failure_info,
            })
            .map_err(PlanningError::Backend)?;

        let raw = backend.process(&prompt).map_err(PlanningError::Backend)?;
        debug!(reply = %raw, "advisor reply");
        let directive = ReplanDirective::parse(&raw)?;
        info!(
            action = %directive.action().as_str(),
            rationale = directive.rationale.as_deref().unwrap_or(""),
            "advisor proposed change"
        );
        Ok(AdvisorReply { raw, directive })
    }
}
