//! CLI tests for the `taskgraph` binary.
//!
//! Model backends are `sh -c` commands that print a fixed reply, so each run
//! is deterministic and needs no network.
#![cfg(unix)]

use std::fs;
use std::process::{Command, Output};

use serde_json::Value;
use taskgraph::core::types::Step;
use taskgraph::exit_codes;
use taskgraph::io::config::{PlannerConfig, load_config, write_config};
use taskgraph::test_support::TestWorkspace;

const NODE_REPLY: &str = r#"cat >/dev/null; printf '%s' '{"use_tool": false, "response": "ok"}'"#;

/// One reply that reads as a node answer, a failing verdict and unusable advice.
const FAILING_REPLY: &str = r#"cat >/dev/null; printf '%s' '{"use_tool": false, "response": "meh", "decision": false, "score": 0, "action": "mystery"}'"#;

fn taskgraph(ws: &TestWorkspace, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_taskgraph"))
        .current_dir(ws.path())
        .env("RUST_LOG", "off")
        .args(args)
        .output()
        .expect("spawn taskgraph")
}

fn two_steps() -> Vec<Step> {
    vec![
        Step::new("Outline", "Outline the report"),
        Step::new("Draft", "Draft the report"),
    ]
}

fn read_json(path: &std::path::Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).expect("read")).expect("json")
}

#[test]
fn init_writes_default_config_once() {
    let ws = TestWorkspace::new().expect("workspace");

    let out = taskgraph(&ws, &["init"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert_eq!(
        load_config(&ws.config_path()).expect("load"),
        PlannerConfig::default()
    );

    fs::write(ws.config_path(), "max_replans = 2\n").expect("overwrite");
    let out = taskgraph(&ws, &["init"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert_eq!(
        fs::read_to_string(ws.config_path()).expect("read"),
        "max_replans = 2\n"
    );
}

#[test]
fn run_with_plan_file_completes_and_reports() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.write_config_with_command(&["sh", "-c", NODE_REPLY])
        .expect("config");
    let plan = ws.write_plan("plan.json", &two_steps()).expect("plan");
    let report = ws.path().join("report.json");

    let out = taskgraph(
        &ws,
        &[
            "run",
            "--task",
            "Write a report",
            "--steps",
            plan.to_str().expect("utf8"),
            "--report",
            report.to_str().expect("utf8"),
        ],
    );

    assert_eq!(out.status.code(), Some(exit_codes::OK), "{out:?}");
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Step 1: A"));
    assert!(stdout.contains("Step 2: B"));
    let report = read_json(&report);
    assert_eq!(report["status"], "completed");
    assert_eq!(report["steps_executed"], 2);
    assert_eq!(report["completed_steps"][1]["result"], "ok");
}

#[test]
fn run_rejects_invalid_plan_file() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.write_config_with_command(&["sh", "-c", NODE_REPLY])
        .expect("config");
    let plan = ws.path().join("plan.json");
    fs::write(&plan, r#"{"steps": []}"#).expect("write plan");

    let out = taskgraph(
        &ws,
        &["run", "--task", "t", "--steps", plan.to_str().expect("utf8")],
    );

    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn failing_backend_writes_failed_report() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.write_config_with_command(&["sh", "-c", "cat >/dev/null; exit 3"])
        .expect("config");
    let plan = ws.write_plan("plan.json", &two_steps()).expect("plan");
    let report = ws.path().join("report.json");

    let out = taskgraph(
        &ws,
        &[
            "run",
            "--task",
            "t",
            "--steps",
            plan.to_str().expect("utf8"),
            "--report",
            report.to_str().expect("utf8"),
        ],
    );

    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    let report = read_json(&report);
    assert_eq!(report["status"], "failed");
    assert_eq!(report["error"]["code"], "backend_error");
}

#[test]
fn unusable_advice_exits_with_abort_code() {
    let ws = TestWorkspace::new().expect("workspace");
    let mut cfg = ws
        .write_config_with_command(&["sh", "-c", FAILING_REPLY])
        .expect("config");
    cfg.max_attempts_default = 1;
    write_config(&ws.config_path(), &cfg).expect("rewrite config");
    let plan = ws.write_plan("plan.json", &two_steps()).expect("plan");
    let report = ws.path().join("report.json");

    let out = taskgraph(
        &ws,
        &[
            "run",
            "--task",
            "t",
            "--steps",
            plan.to_str().expect("utf8"),
            "--evaluate",
            "--report",
            report.to_str().expect("utf8"),
        ],
    );

    assert_eq!(out.status.code(), Some(exit_codes::ABORTED), "{out:?}");
    let report = read_json(&report);
    assert_eq!(report["status"], "aborted");
    assert_eq!(report["error"]["code"], "unresolvable_restart");
    assert_eq!(report["replan_history"][0]["node_id"], "A");
}
