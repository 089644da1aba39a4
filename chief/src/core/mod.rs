//! Pure, deterministic loop logic: the event vocabulary, the stream-json
//! parser, and story pass/fail tracking. No I/O in this tree.

pub mod event;
pub mod parser;
pub mod tracker;
