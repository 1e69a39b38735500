//! Evaluator contract and category lookup.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::context::ContextStore;
use crate::core::types::DEFAULT_CATEGORY;

/// Raw score range used by the bundled evaluator prompt (`0..=40`).
pub const DEFAULT_SCORE_SCALE: f64 = 40.0;

/// Accept/reject call of a verdict: a flag, or a label such as `"Accept Output"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VerdictDecision {
    Flag(bool),
    Label(String),
}

impl VerdictDecision {
    pub fn accepts(&self) -> bool {
        match self {
            VerdictDecision::Flag(flag) => *flag,
            VerdictDecision::Label(label) => label.to_ascii_lowercase().starts_with("accept"),
        }
    }
}

impl Default for VerdictDecision {
    fn default() -> Self {
        VerdictDecision::Flag(false)
    }
}

impl From<bool> for VerdictDecision {
    fn from(flag: bool) -> Self {
        VerdictDecision::Flag(flag)
    }
}

/// Verdict returned by an evaluator.
///
/// Only `score` drives the planner; `decision` and `details` are kept for reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorVerdict {
    #[serde(default)]
    pub decision: VerdictDecision,
    pub score: f64,
    #[serde(default)]
    pub details: Value,
}

impl EvaluatorVerdict {
    /// Zero-score rejection carrying why the reply was unusable.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            decision: VerdictDecision::Flag(false),
            score: 0.0,
            details: Value::String(reason.into()),
        }
    }
}

/// Scores a node result against its task description.
pub trait Evaluator {
    fn evaluate(
        &self,
        task_description: &str,
        result: &str,
        context: &ContextStore,
    ) -> Result<EvaluatorVerdict>;

    /// Upper bound of the raw score.
    fn score_scale(&self) -> f64 {
        DEFAULT_SCORE_SCALE
    }
}

/// Map a raw score onto `[0, 1]` using the evaluator's scale.
pub fn normalize_score(raw: f64, scale: f64) -> f64 {
    if !raw.is_finite() || scale <= 0.0 {
        return 0.0;
    }
    (raw / scale).clamp(0.0, 1.0)
}

pub type EvaluatorRef = Arc<dyn Evaluator + Send + Sync>;

/// Evaluators keyed by node category, with `default` as fallback.
#[derive(Clone, Default)]
pub struct EvaluatorRegistry {
    by_category: BTreeMap<String, EvaluatorRef>,
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, category: impl Into<String>, evaluator: EvaluatorRef) {
        self.by_category.insert(category.into(), evaluator);
    }

    /// Evaluator for `category`, falling back to the `default` entry.
    pub fn lookup(&self, category: &str) -> Option<&EvaluatorRef> {
        self.by_category
            .get(category)
            .or_else(|| self.by_category.get(DEFAULT_CATEGORY))
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.by_category.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_category.is_empty()
    }
}

impl std::fmt::Debug for EvaluatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluatorRegistry")
            .field("categories", &self.by_category.keys().collect::<Vec<_>>())
            .finish()
    }
}
