//! Planner configuration stored in `taskgraph.toml`.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::evaluation::DEFAULT_SCORE_SCALE;
use crate::core::graph::NodeDefaults;
use crate::core::node::{DEFAULT_EVALUATION_THRESHOLD, DEFAULT_MAX_ATTEMPTS};
use crate::core::types::DEFAULT_CATEGORY;
use crate::io::backend::is_known_kind;

pub const DEFAULT_CONFIG_FILE: &str = "taskgraph.toml";

/// Planner configuration (TOML).
///
/// Meant to be edited by hand. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlannerConfig {
    /// Model used for node execution, advising and planning unless overridden.
    pub default_model: String,

    /// `max_attempts` given to nodes built from a linear plan.
    pub max_attempts_default: u32,

    /// `evaluation_threshold` given to nodes built from a linear plan.
    pub evaluation_threshold_default: f64,

    /// Advisor consultations allowed per run.
    pub max_replans: u32,

    /// Node executions allowed per run.
    pub max_steps: u32,

    /// Rendered prompts larger than this drop optional sections.
    pub prompt_budget_bytes: usize,

    pub evaluation: EvaluationConfig,

    pub models: Vec<ModelSpec>,

    pub evaluators: Vec<EvaluatorSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvaluationConfig {
    pub enabled: bool,
    /// Maximum raw score an evaluator can return.
    pub score_scale: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            score_scale: DEFAULT_SCORE_SCALE,
        }
    }
}

/// A named model backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelSpec {
    pub name: String,
    /// Backend kind; see [`crate::io::backend::BACKEND_KINDS`].
    pub kind: String,
    /// Program and arguments; the prompt is written to stdin.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            kind: "command".to_string(),
            command: vec!["llm".to_string()],
            timeout_secs: 5 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

/// Scoring criteria for one node category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluatorSpec {
    pub category: String,
    pub criteria: Vec<String>,
    /// Model used for scoring; falls back to `default_model`.
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for EvaluatorSpec {
    fn default() -> Self {
        Self {
            category: DEFAULT_CATEGORY.to_string(),
            criteria: [
                "Addresses the task as described",
                "Factually correct",
                "Complete, with nothing required left out",
                "Consistent with the context of earlier steps",
                "Specific rather than generic",
                "Clearly structured",
                "Free of unsupported claims",
                "Directly usable by the next step",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
            model: None,
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_model: "default".to_string(),
            max_attempts_default: DEFAULT_MAX_ATTEMPTS,
            evaluation_threshold_default: DEFAULT_EVALUATION_THRESHOLD,
            max_replans: 8,
            max_steps: 200,
            prompt_budget_bytes: 100_000,
            evaluation: EvaluationConfig::default(),
            models: vec![ModelSpec::default()],
            evaluators: vec![EvaluatorSpec::default()],
        }
    }
}

impl PlannerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts_default == 0 {
            return Err(anyhow!("max_attempts_default must be > 0"));
        }
        let threshold = self.evaluation_threshold_default;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(anyhow!("evaluation_threshold_default must be in (0, 1]"));
        }
        if self.max_replans == 0 {
            return Err(anyhow!("max_replans must be > 0"));
        }
        if self.max_steps == 0 {
            return Err(anyhow!("max_steps must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if !(self.evaluation.score_scale > 0.0) {
            return Err(anyhow!("evaluation.score_scale must be > 0"));
        }

        let mut names = BTreeSet::new();
        for model in &self.models {
            if model.name.trim().is_empty() {
                return Err(anyhow!("models[].name must be non-empty"));
            }
            if !names.insert(model.name.as_str()) {
                return Err(anyhow!("duplicate model name '{}'", model.name));
            }
            if !is_known_kind(&model.kind) {
                return Err(anyhow!(
                    "model '{}' has unknown kind '{}'",
                    model.name,
                    model.kind
                ));
            }
            if model.command.is_empty() || model.command[0].trim().is_empty() {
                return Err(anyhow!(
                    "model '{}' command must be a non-empty array",
                    model.name
                ));
            }
            if model.timeout_secs == 0 {
                return Err(anyhow!("model '{}' timeout_secs must be > 0", model.name));
            }
            if model.output_limit_bytes == 0 {
                return Err(anyhow!(
                    "model '{}' output_limit_bytes must be > 0",
                    model.name
                ));
            }
        }
        if !names.contains(self.default_model.as_str()) {
            return Err(anyhow!(
                "default_model '{}' is not defined in [[models]]",
                self.default_model
            ));
        }

        for evaluator in &self.evaluators {
            if evaluator.category.trim().is_empty() {
                return Err(anyhow!("evaluators[].category must be non-empty"));
            }
            if evaluator.criteria.is_empty() {
                return Err(anyhow!(
                    "evaluator '{}' must list at least one criterion",
                    evaluator.category
                ));
            }
            if let Some(model) = &evaluator.model
                && !names.contains(model.as_str())
            {
                return Err(anyhow!(
                    "evaluator '{}' uses undefined model '{model}'",
                    evaluator.category
                ));
            }
        }
        Ok(())
    }

    pub fn node_defaults(&self) -> NodeDefaults {
        NodeDefaults {
            max_attempts: self.max_attempts_default,
            evaluation_threshold: self.evaluation_threshold_default,
        }
    }

    /// Categories with configured criteria, for the linear planner prompt.
    pub fn categories(&self) -> Vec<String> {
        let mut categories: BTreeSet<&str> = self
            .evaluators
            .iter()
            .map(|e| e.category.as_str())
            .collect();
        categories.insert(DEFAULT_CATEGORY);
        categories.into_iter().map(str::to_string).collect()
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PlannerConfig::default()`.
pub fn load_config(path: &Path) -> Result<PlannerConfig> {
    if !path.exists() {
        let cfg = PlannerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PlannerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PlannerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
