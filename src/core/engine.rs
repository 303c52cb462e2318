use crate::config::types::{
    EngineConfig, ProofError, ProofOptions, ProofRequest, ProofResult, ProverCommand, Result,
};
use crate::exec::context::ExecutionContext;
use crate::exec::gate::AdmissionGate;
use crate::exec::invocation::{ProcessOutcome, ProverInvocation};
use crate::observability::metrics::{EngineMetrics, Gauge};
use crate::verdict::verdict::{Verdict, VerdictClassifier};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Proof execution engine: the public entry point.
///
/// Per request: admission → bounded context → spawn → ceilings → request
/// on stdin → wait racing timeout/cancellation → verdict. The admission
/// slot is an RAII guard, so it is released exactly once on every path,
/// faults and dropped futures included.
pub struct ProofEngine {
    config: EngineConfig,
    gate: AdmissionGate,
    metrics: Arc<EngineMetrics>,
}

/// Decrements the in-flight gauge when the invocation ends
struct InFlight<'a>(&'a Gauge);

impl<'a> InFlight<'a> {
    fn enter(gauge: &'a Gauge) -> Self {
        gauge.inc();
        Self(gauge)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.dec();
    }
}

impl ProofEngine {
    pub fn new(config: EngineConfig) -> Self {
        let gate = AdmissionGate::new(config.max_concurrency);
        log::info!(
            "Proof engine initialised: executable={} workspace={} concurrency={}",
            config.prover_executable.display(),
            config.workspace.display(),
            gate.capacity()
        );
        Self {
            config,
            gate,
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn capacity(&self) -> usize {
        self.gate.capacity()
    }

    /// Execution slots free right now
    pub fn available_slots(&self) -> usize {
        self.gate.available()
    }

    pub async fn check(&self, ctx: &ExecutionContext, request: &ProofRequest) -> Result<ProofResult> {
        self.execute(ctx, request.proof(), &request.options).await
    }

    /// Run one proof.
    ///
    /// Returns `Err` only when the prover cannot be started, its ceilings
    /// cannot be applied, or an unclassified I/O error occurs. Every other
    /// outcome, failing proofs included, is an `Ok(ProofResult)`.
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        proof: &str,
        options: &ProofOptions,
    ) -> Result<ProofResult> {
        if proof.trim().is_empty() {
            return Err(ProofError::Config("proof code cannot be empty".to_string()));
        }

        let proof_id = Uuid::now_v7();
        let received = Instant::now();
        self.metrics.requests_total.inc();

        let slot = match self.gate.acquire(ctx).await {
            Ok(slot) => slot,
            Err(e) => {
                log::warn!("[{}] Admission refused: {}", proof_id, e);
                let verdict = Verdict::admission_rejected(e);
                self.metrics.record_outcome(verdict.kind);
                return Ok(Self::stamp(proof_id, verdict, received));
            }
        };
        self.metrics.admission_wait.observe(received.elapsed());
        log::debug!(
            "[{}] Slot acquired ({}/{} in use)",
            proof_id,
            self.gate.in_use(),
            self.gate.capacity()
        );

        let bounded = ctx.bounded(options.timeout);
        if let Some(deadline) = bounded.deadline() {
            log::debug!(
                "[{}] Deadline in {:?}",
                proof_id,
                deadline.saturating_duration_since(tokio::time::Instant::now())
            );
        }
        let outcome = {
            let _in_flight = InFlight::enter(&self.metrics.in_flight);
            self.run_invocation(&proof_id, &bounded, proof, options).await
        };
        slot.release();

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.metrics.faults_total.inc();
                log::error!("[{}] Proof execution failed: {}", proof_id, e);
                return Err(e);
            }
        };
        self.metrics.execution_duration.observe(outcome.elapsed);
        log::debug!(
            "[{}] pid {} ran under {:?}",
            proof_id,
            outcome.pid,
            outcome.limits
        );

        let verdict = VerdictClassifier::classify(&outcome, options);
        self.metrics.record_outcome(verdict.kind);
        log::info!(
            "[{}] {} (success={}, status={}) in {:?}",
            proof_id,
            verdict.kind.as_str(),
            verdict.success,
            verdict.status,
            outcome.elapsed
        );

        Ok(Self::stamp(proof_id, verdict, received))
    }

    async fn run_invocation(
        &self,
        proof_id: &Uuid,
        ctx: &ExecutionContext,
        proof: &str,
        options: &ProofOptions,
    ) -> Result<ProcessOutcome> {
        let payload = serde_json::to_vec(&ProverCommand::new(proof, options))?;

        ProverInvocation::new(&self.config, options, proof_id.to_string())
            .spawn()?
            .apply_limits(options)?
            .send_input(payload, &self.config.output_limits)
            .wait(ctx)
            .await
    }

    fn stamp(proof_id: Uuid, verdict: Verdict, received: Instant) -> ProofResult {
        ProofResult {
            proof_id,
            success: verdict.success,
            status: verdict.status,
            result: verdict.payload,
            error_message: verdict.error_message,
            duration: received.elapsed(),
        }
    }
}
