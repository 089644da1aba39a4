//! Side-effecting operations: plan persistence, configuration, prompt
//! rendering, and agent process control. Kept separate from [`crate::core`]
//! so the loop's logic stays testable without touching disk or spawning
//! processes.

pub mod config;
pub mod plan_store;
pub mod process;
pub mod prompt;
