//! Configuration
//!
//! Engine and per-request option types, plus layered service config loading.

pub mod config;
pub mod types;
