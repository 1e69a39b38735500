//! Scripted collaborators and graph builders for tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::core::context::ContextStore;
use crate::core::evaluation::{Evaluator, EvaluatorVerdict};
use crate::core::graph::PlanGraph;
use crate::core::node::Node;
use crate::core::node_id::NodeId;
use crate::core::tool::Tool;
use crate::core::types::Step;
use crate::io::backend::ModelBackend;
use crate::io::config::{DEFAULT_CONFIG_FILE, ModelSpec, PlannerConfig, write_config};
use crate::io::plan_file::write_plan;

/// Backend that returns canned replies in order and records every prompt.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or_default()
    }
}

impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn process(&self, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .map_err(|_| anyhow!("prompt log poisoned"))?
            .push(prompt.to_string());
        self.replies
            .lock()
            .map_err(|_| anyhow!("reply queue poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow!("scripted backend has no replies left"))
    }
}

/// Node reply answering directly with `text`.
pub fn respond(text: &str) -> String {
    json!({"use_tool": false, "response": text}).to_string()
}

/// Evaluator that returns raw scores (on a 0-40 scale) in order.
#[derive(Debug, Default)]
pub struct ScriptedEvaluator {
    scores: Mutex<VecDeque<f64>>,
}

impl ScriptedEvaluator {
    pub fn new(scores: impl IntoIterator<Item = f64>) -> Self {
        Self {
            scores: Mutex::new(scores.into_iter().collect()),
        }
    }
}

impl Evaluator for ScriptedEvaluator {
    fn evaluate(&self, _: &str, _: &str, _: &ContextStore) -> Result<EvaluatorVerdict> {
        let score = self
            .scores
            .lock()
            .map_err(|_| anyhow!("score queue poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow!("scripted evaluator has no scores left"))?;
        Ok(EvaluatorVerdict {
            decision: (score >= 36.0).into(),
            score,
            details: Value::Null,
        })
    }
}

/// Tool that returns its arguments unchanged.
#[derive(Debug, Clone, Copy)]
pub struct EchoTool;

impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the arguments back"
    }

    fn argument_schema(&self) -> Option<Value> {
        Some(json!({"type": "object", "properties": {"text": {"type": "string"}}}))
    }

    fn invoke(&self, arguments: &Value) -> Result<Value> {
        Ok(arguments.clone())
    }
}

/// Graph `ids[0] → ids[1] → …` with descriptions `task <id>`.
pub fn linear_graph(ids: &[&str]) -> PlanGraph {
    let mut graph = PlanGraph::new();
    for (idx, id) in ids.iter().enumerate() {
        let mut node = Node::new(*id, format!("task {id}"));
        if let Some(next) = ids.get(idx + 1) {
            node.next_nodes.push(NodeId::from(*next));
        }
        graph.add_node(node);
    }
    graph
}

/// Same as [`linear_graph`] with every node limited to `max_attempts`.
pub fn linear_graph_with_attempts(ids: &[&str], max_attempts: u32) -> PlanGraph {
    let mut graph = linear_graph(ids);
    for id in ids {
        if let Some(node) = graph.node_mut(&NodeId::from(*id)) {
            node.max_attempts = max_attempts;
        }
    }
    graph
}

/// Temporary directory holding a config and plan file for CLI runs.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir().context("create temp workspace")?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.path().join(DEFAULT_CONFIG_FILE)
    }

    /// Write a config whose default model runs `command`.
    pub fn write_config_with_command(&self, command: &[&str]) -> Result<PlannerConfig> {
        let mut cfg = PlannerConfig::default();
        cfg.models = vec![ModelSpec {
            command: command.iter().map(|s| s.to_string()).collect(),
            timeout_secs: 30,
            ..ModelSpec::default()
        }];
        write_config(&self.config_path(), &cfg)?;
        Ok(cfg)
    }

    pub fn write_plan(&self, name: &str, steps: &[Step]) -> Result<PathBuf> {
        let path = self.path().join(name);
        write_plan(&path, steps)?;
        Ok(path)
    }
}
