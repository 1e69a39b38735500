//! LLM-driven task orchestration over a mutable plan graph.
//!
//! A task is turned into a linear list of steps, the steps become a chain of
//! graph nodes, and [`planner::GraphPlanner`] walks the chain: each node is
//! executed by a model, optionally scored by an evaluator, retried while it
//! has attempts left, and handed to a replanning advisor once it is exhausted.
//! The advisor either breaks the node into subtasks or rewinds to an earlier
//! node with modifications.
//!
//! - **[`core`]**: plan data and graph surgery. No I/O.
//! - **[`io`]**: model processes, configuration, prompts, plan files, reports.
//! - **[`agents`]**: model-backed node execution, advice, planning and scoring.
//! - **[`planner`]**: the control loop tying them together.

pub mod agents;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod planner;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
