//! Execution control
//!
//! Admission, cancellation contexts and the type-state prover invocation.

pub mod context;
pub mod gate;
pub mod invocation;
