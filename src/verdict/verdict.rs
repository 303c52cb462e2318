/// Verdict classification
///
/// Derives the verdict as a pure function over the observed process
/// outcome. Precedence: engine interruption (timeout, cancellation), then
/// terminating signal in the order SIGKILL > SIGXCPU > SIGXFSZ > SIGSEGV >
/// other, then non-zero exit, then output interpretation.
use crate::config::types::*;
use crate::exec::invocation::{ProcessOutcome, Termination};
use crate::kernel::signal::{signal_name, SignalKind};
use crate::verdict::interpreter::{Interpretation, ResultInterpreter};
use std::time::Duration;

/// Outcome taxonomy, one entry per terminal state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    /// Clean run, no error-severity message
    Verified,
    /// Clean run, prover reported an error-severity message
    LogicalFailure,
    /// Clean run, output was not JSON
    ParseFailed,
    /// Gate saturated past the caller's deadline
    AdmissionRejected,
    TimedOut,
    Cancelled,
    MemoryLimit,
    CpuTimeLimit,
    FileSizeLimit,
    SegmentationFault,
    Signaled,
    ExitedNonZero,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Verified => "verified",
            OutcomeKind::LogicalFailure => "logical_failure",
            OutcomeKind::ParseFailed => "parse_failed",
            OutcomeKind::AdmissionRejected => "admission_rejected",
            OutcomeKind::TimedOut => "timed_out",
            OutcomeKind::Cancelled => "cancelled",
            OutcomeKind::MemoryLimit => "memory_limit",
            OutcomeKind::CpuTimeLimit => "cpu_time_limit",
            OutcomeKind::FileSizeLimit => "file_size_limit",
            OutcomeKind::SegmentationFault => "segmentation_fault",
            OutcomeKind::Signaled => "signaled",
            OutcomeKind::ExitedNonZero => "exited_nonzero",
        }
    }

    pub const ALL: [OutcomeKind; 12] = [
        OutcomeKind::Verified,
        OutcomeKind::LogicalFailure,
        OutcomeKind::ParseFailed,
        OutcomeKind::AdmissionRejected,
        OutcomeKind::TimedOut,
        OutcomeKind::Cancelled,
        OutcomeKind::MemoryLimit,
        OutcomeKind::CpuTimeLimit,
        OutcomeKind::FileSizeLimit,
        OutcomeKind::SegmentationFault,
        OutcomeKind::Signaled,
        OutcomeKind::ExitedNonZero,
    ];
}

/// Classified verdict, ready to be stamped with a proof id
#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    pub kind: OutcomeKind,
    pub success: bool,
    pub status: ProofStatus,
    pub payload: ProofPayload,
    pub error_message: String,
}

impl Verdict {
    fn error(kind: OutcomeKind, payload: ProofPayload, message: String) -> Self {
        Self {
            kind,
            success: false,
            status: ProofStatus::Error,
            payload,
            error_message: message,
        }
    }

    /// Gate saturation is a normal unsuccessful verdict, not a fault
    pub fn admission_rejected(reason: impl std::fmt::Display) -> Self {
        Self::error(
            OutcomeKind::AdmissionRejected,
            ProofPayload::ConcurrencyLimitReached,
            format!("Failed to acquire execution slot: concurrency limit reached ({})", reason),
        )
    }
}

/// Verdict classifier - pure function over a process outcome
pub struct VerdictClassifier;

impl VerdictClassifier {
    pub fn classify(outcome: &ProcessOutcome, options: &ProofOptions) -> Verdict {
        match outcome.termination {
            Termination::TimedOut { after } => Self::classify_timeout(options.timeout, after),
            Termination::Cancelled => Verdict::error(
                OutcomeKind::Cancelled,
                ProofPayload::Cancelled,
                "Execution cancelled before the prover finished".to_string(),
            ),
            Termination::Signaled { signal } => Self::classify_signal(signal, options),
            Termination::Exited { code } if code != 0 => Verdict::error(
                OutcomeKind::ExitedNonZero,
                ProofPayload::ProcessError { return_code: code },
                format!(
                    "Process exited with code {}: {}",
                    code,
                    outcome.stderr.text().trim_end()
                ),
            ),
            Termination::Exited { .. } => Self::classify_output(outcome),
        }
    }

    fn classify_timeout(configured: Option<Duration>, after: Duration) -> Verdict {
        Verdict::error(
            OutcomeKind::TimedOut,
            ProofPayload::Timeout,
            format!("Process timed out after {:?}", configured.unwrap_or(after)),
        )
    }

    fn classify_signal(signal: i32, options: &ProofOptions) -> Verdict {
        match SignalKind::classify(signal) {
            SignalKind::MemoryExhaustion => Verdict::error(
                OutcomeKind::MemoryLimit,
                ProofPayload::MemoryLimitExceeded,
                format!(
                    "Process was killed (SIGKILL) - likely exceeded the virtual-memory ceiling ({})",
                    describe_bytes(options.memory_limit)
                ),
            ),
            SignalKind::CpuTimeLimit => Verdict::error(
                OutcomeKind::CpuTimeLimit,
                ProofPayload::CpuTimeLimitExceeded,
                format!(
                    "Process exceeded CPU-time ceiling ({})",
                    options
                        .cpu_time_limit
                        .map(|d| format!("{:?}", d))
                        .unwrap_or_else(|| "unlimited".to_string())
                ),
            ),
            SignalKind::FileSizeLimit => Verdict::error(
                OutcomeKind::FileSizeLimit,
                ProofPayload::FileSizeLimitExceeded,
                format!(
                    "Process exceeded file-size ceiling ({})",
                    describe_bytes(options.file_size_limit)
                ),
            ),
            SignalKind::SegmentationFault => Verdict::error(
                OutcomeKind::SegmentationFault,
                ProofPayload::SegmentationFault,
                format!(
                    "Process crashed with segmentation fault - possibly stack overflow (stack ceiling: {})",
                    describe_bytes(options.stack_limit)
                ),
            ),
            SignalKind::Other(raw) => Verdict::error(
                OutcomeKind::Signaled,
                ProofPayload::ProcessKilled {
                    signal: signal_name(raw),
                },
                format!("Process was terminated by signal {}", signal_name(raw)),
            ),
        }
    }

    fn classify_output(outcome: &ProcessOutcome) -> Verdict {
        match ResultInterpreter::interpret(&outcome.stdout.data) {
            Interpretation::Parsed { payload, success } => Verdict {
                kind: if success {
                    OutcomeKind::Verified
                } else {
                    OutcomeKind::LogicalFailure
                },
                success,
                status: ProofStatus::Finished,
                payload: ProofPayload::Output(payload),
                error_message: outcome.stderr.text(),
            },
            Interpretation::ParseFailed { raw_output, error } => Verdict::error(
                OutcomeKind::ParseFailed,
                ProofPayload::ParseFailed {
                    raw_output,
                    parse_error_message: error.clone(),
                },
                format!("Error parsing JSON from prover: {}", error),
            ),
        }
    }
}

fn describe_bytes(limit: Option<u64>) -> String {
    match limit {
        Some(bytes) if bytes > 0 => format!("{} bytes", bytes),
        _ => "unlimited".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::output::CapturedStream;

    fn outcome(termination: Termination, stdout: &[u8], stderr: &[u8]) -> ProcessOutcome {
        ProcessOutcome {
            pid: 4242,
            termination,
            stdout: CapturedStream {
                data: stdout.to_vec(),
                total_bytes: stdout.len(),
                ..CapturedStream::default()
            },
            stderr: CapturedStream {
                data: stderr.to_vec(),
                total_bytes: stderr.len(),
                ..CapturedStream::default()
            },
            limits: Vec::new(),
            elapsed: Duration::from_millis(5),
        }
    }

    fn signaled(signal: i32) -> Verdict {
        VerdictClassifier::classify(
            &outcome(Termination::Signaled { signal }, b"", b""),
            &ProofOptions::default(),
        )
    }

    #[test]
    fn test_memory_signal() {
        let verdict = signaled(libc::SIGKILL);
        assert_eq!(verdict.kind, OutcomeKind::MemoryLimit);
        assert_eq!(verdict.status, ProofStatus::Error);
        assert!(!verdict.success);
        assert!(verdict.error_message.contains("virtual-memory ceiling"));
        assert!(verdict.error_message.contains("1073741824 bytes"));
    }

    #[test]
    fn test_cpu_signal() {
        let verdict = signaled(libc::SIGXCPU);
        assert_eq!(verdict.kind, OutcomeKind::CpuTimeLimit);
        assert!(verdict.error_message.contains("CPU-time"));
    }

    #[test]
    fn test_file_size_signal() {
        let verdict = signaled(libc::SIGXFSZ);
        assert_eq!(verdict.kind, OutcomeKind::FileSizeLimit);
        assert!(verdict.error_message.contains("file-size"));
    }

    #[test]
    fn test_segfault_signal() {
        let verdict = signaled(libc::SIGSEGV);
        assert_eq!(verdict.kind, OutcomeKind::SegmentationFault);
        assert!(verdict.error_message.contains("segmentation fault"));
        assert!(verdict.error_message.contains("stack"));
    }

    #[test]
    fn test_other_signal() {
        let verdict = signaled(libc::SIGTERM);
        assert_eq!(verdict.kind, OutcomeKind::Signaled);
        assert_eq!(
            verdict.payload,
            ProofPayload::ProcessKilled {
                signal: "SIGTERM".to_string()
            }
        );
    }

    #[test]
    fn test_nonzero_exit_carries_stderr_and_code() {
        let verdict = VerdictClassifier::classify(
            &outcome(Termination::Exited { code: 2 }, b"", b"unknown package 'Mathlib'\n"),
            &ProofOptions::default(),
        );
        assert_eq!(verdict.kind, OutcomeKind::ExitedNonZero);
        assert_eq!(verdict.payload, ProofPayload::ProcessError { return_code: 2 });
        assert_eq!(
            verdict.error_message,
            "Process exited with code 2: unknown package 'Mathlib'"
        );
    }

    #[test]
    fn test_clean_exit_with_error_message() {
        let verdict = VerdictClassifier::classify(
            &outcome(
                Termination::Exited { code: 0 },
                br#"{"messages":[{"severity":"error","data":"unsolved goals"}]}"#,
                b"",
            ),
            &ProofOptions::default(),
        );
        assert_eq!(verdict.kind, OutcomeKind::LogicalFailure);
        assert_eq!(verdict.status, ProofStatus::Finished);
        assert!(!verdict.success);
        assert_eq!(verdict.payload.messages().unwrap().len(), 1);
    }

    #[test]
    fn test_clean_exit_verified() {
        let verdict = VerdictClassifier::classify(
            &outcome(Termination::Exited { code: 0 }, br#"{"env": 0}"#, b"note\n"),
            &ProofOptions::default(),
        );
        assert_eq!(verdict.kind, OutcomeKind::Verified);
        assert!(verdict.success);
        assert_eq!(verdict.error_message, "note\n");
    }

    #[test]
    fn test_parse_failure() {
        let verdict = VerdictClassifier::classify(
            &outcome(Termination::Exited { code: 0 }, b"not json", b""),
            &ProofOptions::default(),
        );
        assert_eq!(verdict.kind, OutcomeKind::ParseFailed);
        assert_eq!(verdict.status, ProofStatus::Error);
        match verdict.payload {
            ProofPayload::ParseFailed { raw_output, .. } => assert_eq!(raw_output, "not json"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_timeout_reports_configured_bound() {
        let options = ProofOptions {
            timeout: Some(Duration::from_secs(3)),
            ..ProofOptions::default()
        };
        let verdict = VerdictClassifier::classify(
            &outcome(
                Termination::TimedOut {
                    after: Duration::from_millis(3004),
                },
                b"",
                b"",
            ),
            &options,
        );
        assert_eq!(verdict.kind, OutcomeKind::TimedOut);
        assert_eq!(verdict.error_message, "Process timed out after 3s");
    }

    #[test]
    fn test_admission_rejected() {
        let verdict = Verdict::admission_rejected("deadline exceeded");
        assert_eq!(verdict.payload, ProofPayload::ConcurrencyLimitReached);
        assert!(verdict.error_message.contains("concurrency limit reached"));
    }
}
