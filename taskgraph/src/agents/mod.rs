//! Model-backed agents: node execution, replanning advice, linear planning
//! and scoring.

pub mod advisor;
pub mod evaluator;
pub mod linear_planner;
pub mod node_executor;
