//! The execute / evaluate / replan control loop.

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::agents::advisor::ReplanAdvisor;
use crate::agents::node_executor::{NodeAgent, TaskContext};
use crate::core::context::{ContextKey, ContextStore};
use crate::core::evaluation::{EvaluatorRegistry, normalize_score};
use crate::core::graph::{PlanGraph, prune_target};
use crate::core::node::{Node, should_replan};
use crate::core::node_id::NodeId;
use crate::core::types::{CompletedStep, ExecutionHistory};
use crate::error::PlanningError;
use crate::io::backend::BackendRef;
use crate::io::config::PlannerConfig;
use crate::io::prompt::PromptBuilder;

/// Limits and switches for one planner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannerSettings {
    pub max_replans: u32,
    pub max_steps: u32,
    pub evaluation_enabled: bool,
    pub prompt_budget_bytes: usize,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        PlannerSettings::from(&PlannerConfig::default())
    }
}

impl From<&PlannerConfig> for PlannerSettings {
    fn from(cfg: &PlannerConfig) -> Self {
        Self {
            max_replans: cfg.max_replans,
            max_steps: cfg.max_steps,
            evaluation_enabled: cfg.evaluation.enabled,
            prompt_budget_bytes: cfg.prompt_budget_bytes,
        }
    }
}

/// Mutable state of one task run: the graph, its context store and the
/// steps completed so far.
#[derive(Debug, Clone)]
pub struct PlanRun {
    pub task: String,
    pub background: String,
    pub graph: PlanGraph,
    pub context: ContextStore,
    pub history: ExecutionHistory,
    pub steps_executed: u32,
    pub replans: u32,
}

impl PlanRun {
    pub fn new(task: impl Into<String>, graph: PlanGraph) -> Self {
        Self {
            task: task.into(),
            background: String::new(),
            graph,
            context: ContextStore::new(),
            history: ExecutionHistory::default(),
            steps_executed: 0,
            replans: 0,
        }
    }

    pub fn with_background(mut self, background: impl Into<String>) -> Self {
        self.background = background.into();
        self
    }
}

/// What the loop decided after evaluating one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Advance,
    /// Threshold met and the node has no successor.
    Complete,
    Retry,
    Replan,
}

/// Emitted once per node execution.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEvent {
    pub node_id: NodeId,
    pub attempt: u32,
    pub score: f64,
    pub decision: Decision,
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub last_node_id: NodeId,
    pub history: ExecutionHistory,
    pub steps_executed: u32,
    pub replans: u32,
}

/// Walks a [`PlanGraph`], executing, scoring and restructuring it.
#[derive(Clone)]
pub struct GraphPlanner {
    backend: BackendRef,
    advisor_backend: BackendRef,
    evaluators: EvaluatorRegistry,
    settings: PlannerSettings,
    node_agent: NodeAgent,
    advisor: ReplanAdvisor,
}

impl GraphPlanner {
    pub fn new(backend: BackendRef, settings: PlannerSettings) -> Self {
        let prompts = PromptBuilder::new(settings.prompt_budget_bytes);
        Self {
            advisor_backend: backend.clone(),
            backend,
            evaluators: EvaluatorRegistry::new(),
            settings,
            node_agent: NodeAgent::new(prompts.clone()),
            advisor: ReplanAdvisor::new(prompts),
        }
    }

    pub fn with_evaluators(mut self, evaluators: EvaluatorRegistry) -> Self {
        self.evaluators = evaluators;
        self
    }

    /// Use a different model for replanning advice.
    pub fn with_advisor_backend(mut self, backend: BackendRef) -> Self {
        self.advisor_backend = backend;
        self
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    /// Run from the graph's cursor until a node without successor passes.
    ///
    /// `on_event` sees every attempt. Errors leave `run` as it was at the
    /// failure, so callers can still report on it.
    #[instrument(skip_all, fields(nodes = run.graph.len()))]
    pub fn execute_plan<F: FnMut(&NodeEvent)>(
        &self,
        run: &mut PlanRun,
        mut on_event: F,
    ) -> Result<RunOutcome, PlanningError> {
        let mut cursor = run
            .graph
            .current_node_id()
            .cloned()
            .ok_or(PlanningError::EmptyPlan)?;

        loop {
            if run.steps_executed >= self.settings.max_steps {
                error!(max_steps = self.settings.max_steps, "step budget exhausted");
                return Err(PlanningError::StepBudgetExhausted(self.settings.max_steps));
            }
            run.graph.set_cursor(cursor.clone());
            let Some(node) = run.graph.node_mut(&cursor) else {
                error!(node_id = %cursor, "cursor points at a missing node");
                return Err(PlanningError::MissingNode(cursor));
            };

            run.steps_executed += 1;
            let task = TaskContext {
                task: &run.task,
                background: &run.background,
            };
            let result =
                self.node_agent
                    .execute(self.backend.as_ref(), node, task, &mut run.context)?;
            let score = self.evaluate(node, &result, &run.context)?;
            node.record_score(&result, score, Utc::now());
            let attempt = node.current_attempts;

            if node.passes(score) {
                run.history.push(CompletedStep {
                    name: cursor.to_string(),
                    description: node.task_description.clone(),
                    result,
                });
                run.context.clear_failed_attempts(&cursor);
                let next = node.next().cloned();
                let decision = if next.is_some() {
                    Decision::Advance
                } else {
                    Decision::Complete
                };
                info!(node_id = %cursor, attempt, score, "node passed");
                on_event(&NodeEvent {
                    node_id: cursor.clone(),
                    attempt,
                    score,
                    decision,
                });
                match next {
                    Some(next) => cursor = next,
                    None => {
                        info!(
                            steps = run.steps_executed,
                            replans = run.replans,
                            "plan complete"
                        );
                        return Ok(RunOutcome {
                            last_node_id: cursor,
                            history: run.history.clone(),
                            steps_executed: run.steps_executed,
                            replans: run.replans,
                        });
                    }
                }
                continue;
            }

            if !should_replan(node) {
                warn!(node_id = %cursor, attempt, score, "below threshold, retrying");
                run.context
                    .remove(&ContextKey::PreviousStep(cursor.clone()));
                run.context.add(
                    ContextKey::FailedAttempt(cursor.clone(), attempt),
                    format!(
                        "Attempted at {}\nTask response: {}",
                        Utc::now().format("%Y-%m-%d %H:%M:%S"),
                        result
                    ),
                );
                on_event(&NodeEvent {
                    node_id: cursor.clone(),
                    attempt,
                    score,
                    decision: Decision::Retry,
                });
                continue;
            }

            let reason = node.record_exhaustion();
            warn!(node_id = %cursor, attempt, score, "attempts exhausted, replanning");
            on_event(&NodeEvent {
                node_id: cursor.clone(),
                attempt,
                score,
                decision: Decision::Replan,
            });
            cursor = self.replan(run, &cursor, &reason)?;
        }
    }

    fn evaluate(
        &self,
        node: &Node,
        result: &str,
        context: &ContextStore,
    ) -> Result<f64, PlanningError> {
        if !self.settings.evaluation_enabled {
            return Ok(1.0);
        }
        let Some(evaluator) = self.evaluators.lookup(&node.category) else {
            warn!(node_id = %node.id, category = %node.category, "no evaluator registered, accepting result");
            return Ok(1.0);
        };
        let verdict = evaluator
            .evaluate(&node.task_description, result, context)
            .map_err(|source| PlanningError::Evaluator {
                category: node.category.clone(),
                source,
            })?;
        Ok(normalize_score(verdict.score, evaluator.score_scale()))
    }

    /// Consult the advisor for `failed`, restructure the graph and return the
    /// node to resume from.
    #[instrument(skip_all, fields(node_id = %failed))]
    fn replan(
        &self,
        run: &mut PlanRun,
        failed: &NodeId,
        reason: &str,
    ) -> Result<NodeId, PlanningError> {
        if run.replans >= self.settings.max_replans {
            error!(max_replans = self.settings.max_replans, "replan budget exhausted");
            return Err(PlanningError::ReplanBudgetExhausted(
                self.settings.max_replans,
            ));
        }
        run.replans += 1;

        let reply = self
            .advisor
            .advise(
                self.advisor_backend.as_ref(),
                &run.task,
                &run.graph,
                failed,
                reason,
            )
            .inspect_err(|err| error!(err = %err, "advisor reply unusable"))?;
        run.graph.record_replan(failed, reason, &reply.raw);

        let mut directive = reply.directive;
        directive.assign_missing_subtask_ids(failed);
        run.graph.apply_directive(failed, &directive);

        let target = prune_target(failed, &directive);
        run.context.prune_range(failed, &target);

        let restart = run
            .graph
            .resolve_restart(&directive)
            .inspect_err(|err| error!(err = %err, "cannot resume after replan"))?;
        info!(
            action = %directive.action().as_str(),
            restart = %restart,
            "resuming after replan"
        );
        Ok(restart)
    }
}
