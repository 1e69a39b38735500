//! Deterministic planning logic.
//!
//! Core modules hold no I/O. They operate on in-memory plan data and talk to
//! models, tools and evaluators only through the traits defined here or in
//! [`crate::io`].

pub mod context;
pub mod directive;
pub mod evaluation;
pub mod graph;
pub mod node;
pub mod node_id;
pub mod reply;
pub mod tool;
pub mod types;
