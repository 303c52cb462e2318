//! proofbox: bounded execution of an external proof checker
//! Runs one prover process per request under OS resource ceilings, a
//! wall-clock deadline and a global concurrency bound.
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::rlimit`]: Per-process resource ceilings (CPU, AS, stack, fsize, nofile)
//! - [`kernel::signal`]: Termination-signal taxonomy and process-group kill
//!
//! ## Execution Control ([`exec`])
//! - [`exec::gate`]: Admission gate bounding concurrent provers
//! - [`exec::context`]: Cancellation token plus optional deadline
//! - [`exec::invocation`]: Type-state prover lifecycle (spawn, limit, feed, wait)
//!
//! ## Core ([`core`])
//! - [`core::engine`]: Proof execution engine, the public entry point
//!
//! ## Verdict ([`verdict`])
//! - [`verdict::interpreter`]: Prover JSON output interpretation
//! - [`verdict::verdict`]: Termination classification into a result
//!
//! ## Observability ([`observability`])
//! - [`observability::metrics`]: Prometheus metrics export
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Options, results, payloads and the crate error
//! - [`config::config`]: Layered service configuration loading
//!
//! ## Utilities ([`utils`])
//! - [`utils::output`]: Bounded output collection
//!
//! # Design Principles
//!
//! 1. **Slots are guards** - An admission slot is released by drop, on every path
//! 2. **No orphaned provers** - The process group is killed after every run
//! 3. **Types prevent errors** - Invocation steps cannot run out of order
//! 4. **Failures are results** - Only setup faults surface as `Err`

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Engine
pub mod core;

// Verdict
pub mod verdict;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// CLI entrypoint wiring for the proofbox binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use core::engine::ProofEngine;
pub use exec::context::ExecutionContext;
