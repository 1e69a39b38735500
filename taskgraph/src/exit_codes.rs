//! Stable exit codes for `taskgraph` commands.

/// Command succeeded; for `run`, the plan completed.
pub const OK: i32 = 0;
/// Invalid input or config, or a model/tool/evaluator failure.
pub const INVALID: i32 = 1;
/// The planner gave up: unusable advice, missing node, or exhausted budget.
pub const ABORTED: i32 = 3;
