//! Proof execution core.
//!
//! The engine ties admission, the prover invocation chain and verdict
//! classification together. Everything below it is prover-agnostic.

pub mod engine;
