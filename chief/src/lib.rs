//! Plan-driven agent loop runner.
//!
//! This crate drives an autonomous coding agent through repeated iterations
//! against a plan of user stories (`.chief/prds/<name>/prd.json`), parsing
//! the agent's stream-json stdout into typed events and using those events to
//! decide whether to continue, stop, or fail. The architecture enforces a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (event model, line parser, story
//!   tracking). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (plan persistence, config, prompt
//!   rendering, process control). Isolated to enable mocking in tests.
//!
//! [`looping`] coordinates core logic with I/O to implement the bounded
//! iteration loop behind `chief run`.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod plan;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
