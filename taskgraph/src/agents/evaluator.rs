//! Model-backed evaluator and registry construction from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::core::context::ContextStore;
use crate::core::evaluation::{Evaluator, EvaluatorRegistry, EvaluatorVerdict};
use crate::core::reply::parse_json_reply;
use crate::error::ParseStage;
use crate::io::backend::{BackendRef, ModelRegistry};
use crate::io::config::PlannerConfig;
use crate::io::prompt::{EvaluatorPromptInputs, PromptBuilder};

/// Scores results by asking a model to grade them against fixed criteria.
pub struct ModelEvaluator {
    backend: BackendRef,
    criteria: Vec<String>,
    score_scale: f64,
    prompts: PromptBuilder,
}

impl ModelEvaluator {
    pub fn new(
        backend: BackendRef,
        criteria: Vec<String>,
        score_scale: f64,
        prompts: PromptBuilder,
    ) -> Self {
        Self {
            backend,
            criteria,
            score_scale,
            prompts,
        }
    }
}

impl Evaluator for ModelEvaluator {
    #[instrument(skip_all, fields(model = %self.backend.name()))]
    fn evaluate(
        &self,
        task_description: &str,
        result: &str,
        context: &ContextStore,
    ) -> Result<EvaluatorVerdict> {
        let rendered_context = context.render();
        let prompt = self.prompts.build_evaluator(&EvaluatorPromptInputs {
            task_description,
            result,
            criteria: &self.criteria,
            context: &rendered_context,
            score_scale: self.score_scale,
        })?;
        let raw = self.backend.process(&prompt)?;
        debug!(reply = %raw, "evaluator reply");
        match parse_json_reply::<EvaluatorVerdict>(&raw, ParseStage::EvaluatorReply) {
            Ok(verdict) => Ok(verdict),
            Err(err) => {
                warn!(err = %err, "unusable evaluator reply, scoring 0");
                Ok(EvaluatorVerdict::rejected(err.to_string()))
            }
        }
    }

    fn score_scale(&self) -> f64 {
        self.score_scale
    }
}

/// One [`ModelEvaluator`] per configured category.
pub fn build_evaluators(cfg: &PlannerConfig, models: &ModelRegistry) -> Result<EvaluatorRegistry> {
    let mut registry = EvaluatorRegistry::new();
    for spec in &cfg.evaluators {
        let model = spec.model.as_deref().unwrap_or(&cfg.default_model);
        let backend = models
            .get(model)
            .with_context(|| format!("evaluator for category '{}'", spec.category))?;
        registry.register(
            spec.category.clone(),
            Arc::new(ModelEvaluator::new(
                backend,
                spec.criteria.clone(),
                cfg.evaluation.score_scale,
                PromptBuilder::new(cfg.prompt_budget_bytes),
            )),
        );
    }
    Ok(registry)
}
