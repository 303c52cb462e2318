// Engine metrics
//
// Counters for admission and per-outcome verdicts, an in-flight gauge and
// latency histograms, exported in Prometheus text format. The registry is
// owned by one engine and shared through Arc; there is no global instance.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::verdict::verdict::OutcomeKind;

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Up/down gauge
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        // Saturate at zero instead of wrapping
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Cumulative-bucket latency histogram
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    buckets: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn with_bounds(bounds: &[f64]) -> Self {
        Self {
            bounds: bounds.to_vec(),
            buckets: bounds.iter().map(|_| AtomicU64::new(0)).collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Buckets sized for prover runs: tens of milliseconds up to minutes
    pub fn new_prover_latency() -> Self {
        Self::with_bounds(&[0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0])
    }

    pub fn observe(&self, value: Duration) {
        let seconds = value.as_secs_f64();
        self.sum_micros
            .fetch_add(value.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        for (bound, bucket) in self.bounds.iter().zip(&self.buckets) {
            if seconds <= *bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn bucket_count(&self, le: f64) -> u64 {
        self.bounds
            .iter()
            .position(|b| (b - le).abs() < 1e-9)
            .map(|i| self.buckets[i].load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn export(&self, name: &str, help: &str, out: &mut String) {
        let _ = writeln!(out, "# HELP {} {}", name, help);
        let _ = writeln!(out, "# TYPE {} histogram", name);
        for (bound, bucket) in self.bounds.iter().zip(&self.buckets) {
            let _ = writeln!(
                out,
                "{}_bucket{{le=\"{}\"}} {}",
                name,
                bound,
                bucket.load(Ordering::Relaxed)
            );
        }
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, self.count());
        let _ = writeln!(
            out,
            "{}_sum {}",
            name,
            self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
        );
        let _ = writeln!(out, "{}_count {}", name, self.count());
    }
}

/// Metrics for one proof engine
#[derive(Debug)]
pub struct EngineMetrics {
    pub requests_total: Counter,
    pub faults_total: Counter,
    pub in_flight: Gauge,
    outcomes: Vec<(OutcomeKind, Counter)>,
    pub admission_wait: Histogram,
    pub execution_duration: Histogram,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Counter::default(),
            faults_total: Counter::default(),
            in_flight: Gauge::default(),
            outcomes: OutcomeKind::ALL
                .iter()
                .map(|kind| (*kind, Counter::default()))
                .collect(),
            admission_wait: Histogram::new_prover_latency(),
            execution_duration: Histogram::new_prover_latency(),
        }
    }

    pub fn record_outcome(&self, kind: OutcomeKind) {
        if let Some((_, counter)) = self.outcomes.iter().find(|(k, _)| *k == kind) {
            counter.inc();
        }
    }

    pub fn outcome_count(&self, kind: OutcomeKind) -> u64 {
        self.outcomes
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, c)| c.get())
            .unwrap_or(0)
    }

    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "# HELP proofbox_requests_total Proof requests received");
        let _ = writeln!(out, "# TYPE proofbox_requests_total counter");
        let _ = writeln!(out, "proofbox_requests_total {}", self.requests_total.get());

        let _ = writeln!(out, "# HELP proofbox_outcomes_total Verdicts by outcome");
        let _ = writeln!(out, "# TYPE proofbox_outcomes_total counter");
        for (kind, counter) in &self.outcomes {
            let _ = writeln!(
                out,
                "proofbox_outcomes_total{{outcome=\"{}\"}} {}",
                kind.as_str(),
                counter.get()
            );
        }

        let _ = writeln!(out, "# HELP proofbox_faults_total Requests that ended in a fault");
        let _ = writeln!(out, "# TYPE proofbox_faults_total counter");
        let _ = writeln!(out, "proofbox_faults_total {}", self.faults_total.get());

        let _ = writeln!(out, "# HELP proofbox_in_flight Provers currently running");
        let _ = writeln!(out, "# TYPE proofbox_in_flight gauge");
        let _ = writeln!(out, "proofbox_in_flight {}", self.in_flight.get());

        self.admission_wait.export(
            "proofbox_admission_wait_seconds",
            "Time spent waiting for an execution slot",
            &mut out,
        );
        self.execution_duration.export(
            "proofbox_execution_duration_seconds",
            "Prover wall time from spawn to reap",
            &mut out,
        );

        out
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
