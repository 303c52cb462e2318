//! Observability
//!
//! Per-engine counters and latency histograms.

pub mod metrics;
