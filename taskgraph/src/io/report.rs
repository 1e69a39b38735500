//! JSON report of a finished run.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::graph::ReplanHistory;
use crate::core::node::Node;
use crate::core::types::CompletedStep;
use crate::error::PlanningError;
use crate::planner::{PlanRun, RunOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Stopped by the planner (bad advice, missing node, budget).
    Aborted,
    /// A model, tool or evaluator failed.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportError {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport<'a> {
    pub task: &'a str,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReportError>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub steps_executed: u32,
    pub replans: u32,
    pub nodes: Vec<&'a Node>,
    pub replan_history: &'a ReplanHistory,
    pub completed_steps: &'a [CompletedStep],
}

impl<'a> RunReport<'a> {
    pub fn new(
        run: &'a PlanRun,
        result: &Result<RunOutcome, PlanningError>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let (status, error) = match result {
            Ok(_) => (RunStatus::Completed, None),
            Err(err) => (
                if err.is_plan_abort() {
                    RunStatus::Aborted
                } else {
                    RunStatus::Failed
                },
                Some(ReportError {
                    code: err.code(),
                    message: format!("{err:#}"),
                }),
            ),
        };
        Self {
            task: &run.task,
            status,
            error,
            started_at,
            ended_at: Utc::now(),
            steps_executed: run.steps_executed,
            replans: run.replans,
            nodes: run.graph.nodes().collect(),
            replan_history: run.graph.replan_history(),
            completed_steps: run.history.steps(),
        }
    }
}

pub fn write_report(path: &Path, report: &RunReport<'_>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create report dir {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(report).context("serialize run report")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write report {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node_id::NodeId;
    use crate::test_support::linear_graph;
    use serde_json::Value;

    #[test]
    fn report_captures_failure_code_and_nodes() {
        let mut run = PlanRun::new("Plan a trip", linear_graph(&["A", "B"]));
        run.graph
            .node_mut(&NodeId::from("A"))
            .expect("A")
            .record_score("draft", 0.5, Utc::now());
        run.graph
            .record_replan(&NodeId::from("A"), "too low", "{\"action\":\"mystery\"}");
        let result = Err(PlanningError::UnresolvableRestart {
            action: "mystery".to_string(),
            requested: "none".to_string(),
        });

        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("out").join("report.json");
        write_report(&path, &RunReport::new(&run, &result, Utc::now())).expect("write");

        let value: Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["status"], "aborted");
        assert_eq!(value["error"]["code"], "unresolvable_restart");
        assert_eq!(value["nodes"][0]["id"], "A");
        assert_eq!(value["nodes"][0]["execution_results"][0]["evaluation_score"], 0.5);
        assert_eq!(value["nodes"][1]["next_nodes"], serde_json::json!([]));
        assert_eq!(value["replan_history"][0]["failure_reason"], "too low");
    }

    #[test]
    fn completed_report_has_no_error() {
        let run = PlanRun::new("task", linear_graph(&["A"]));
        let result = Ok(RunOutcome {
            last_node_id: NodeId::from("A"),
            history: run.history.clone(),
            steps_executed: 1,
            replans: 0,
        });
        let report = RunReport::new(&run, &result, Utc::now());
        assert_eq!(report.status, RunStatus::Completed);
        let value = serde_json::to_value(&report).expect("json");
        assert!(value.get("error").is_none());
    }
}
