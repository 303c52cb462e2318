//! Verdict classification
//!
//! Derives verdicts as pure functions over a finished process outcome.

pub mod interpreter;
pub mod verdict;
