//! Side-effecting collaborators: model processes, configuration, prompts,
//! plan files and reports.

pub mod backend;
pub mod config;
pub mod plan_file;
pub mod process;
pub mod prompt;
pub mod report;
