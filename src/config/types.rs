/// Core types and structures for the proofbox engine
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::utils::output::OutputLimits;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CPU_TIME_LIMIT: Duration = Duration::from_secs(10);
pub const DEFAULT_MEMORY_LIMIT: u64 = 1024 * 1024 * 1024; // 1GiB
pub const DEFAULT_STACK_LIMIT: u64 = 8 * 1024 * 1024; // 8MiB
pub const DEFAULT_FILE_SIZE_LIMIT: u64 = 100 * 1024 * 1024; // 100MiB
pub const DEFAULT_OPEN_FILES_LIMIT: u64 = 1024;
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Engine-level configuration, injected at construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prover executable (e.g. `lake`)
    pub prover_executable: PathBuf,
    /// Working directory the prover runs in
    pub workspace: PathBuf,
    /// Maximum number of simultaneously running provers
    pub max_concurrency: usize,
    /// Fixed arguments selecting the prover's interactive evaluation mode
    pub prover_args: Vec<String>,
    /// Bounds on captured stdout/stderr
    pub output_limits: OutputLimits,
}

impl EngineConfig {
    pub fn new(prover_executable: impl Into<PathBuf>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            prover_executable: prover_executable.into(),
            workspace: workspace.into(),
            ..Self::default()
        }
    }

    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prover_executable: PathBuf::from("/root/.elan/bin/lake"),
            workspace: PathBuf::from("/app/lean-runner/playground"),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            prover_args: vec!["exe".to_string(), "repl".to_string()],
            output_limits: OutputLimits::default(),
        }
    }
}

/// Per-request execution options.
///
/// A `None` ceiling is not applied by the engine. Callers that want the
/// service defaults run the options through [`ProofOptions::with_defaults`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProofOptions {
    /// Wall-clock timeout
    #[serde(with = "duration_secs")]
    pub timeout: Option<Duration>,
    /// CPU-time ceiling (RLIMIT_CPU, whole seconds)
    #[serde(with = "duration_secs")]
    pub cpu_time_limit: Option<Duration>,
    /// Virtual address-space ceiling in bytes (RLIMIT_AS)
    pub memory_limit: Option<u64>,
    /// Stack-size ceiling in bytes (RLIMIT_STACK)
    pub stack_limit: Option<u64>,
    /// Output file-size ceiling in bytes (RLIMIT_FSIZE)
    pub file_size_limit: Option<u64>,
    /// Open file descriptor ceiling (RLIMIT_NOFILE)
    pub open_files_limit: Option<u64>,
    pub all_tactics: bool,
    pub ast: bool,
    pub tactics: bool,
    pub premises: bool,
}

impl ProofOptions {
    /// Options with no ceilings and no timeout.
    pub fn unbounded() -> Self {
        Self {
            timeout: None,
            cpu_time_limit: None,
            memory_limit: None,
            stack_limit: None,
            file_size_limit: None,
            open_files_limit: None,
            all_tactics: false,
            ast: false,
            tactics: false,
            premises: false,
        }
    }

    /// Fill every unset or zero ceiling with the service default.
    pub fn with_defaults(self) -> Self {
        fn dur(value: Option<Duration>, fallback: Duration) -> Option<Duration> {
            match value {
                Some(d) if !d.is_zero() => Some(d),
                _ => Some(fallback),
            }
        }
        fn bytes(value: Option<u64>, fallback: u64) -> Option<u64> {
            match value {
                Some(v) if v > 0 => Some(v),
                _ => Some(fallback),
            }
        }

        Self {
            timeout: dur(self.timeout, DEFAULT_TIMEOUT),
            cpu_time_limit: dur(self.cpu_time_limit, DEFAULT_CPU_TIME_LIMIT),
            memory_limit: bytes(self.memory_limit, DEFAULT_MEMORY_LIMIT),
            stack_limit: bytes(self.stack_limit, DEFAULT_STACK_LIMIT),
            file_size_limit: bytes(self.file_size_limit, DEFAULT_FILE_SIZE_LIMIT),
            open_files_limit: bytes(self.open_files_limit, DEFAULT_OPEN_FILES_LIMIT),
            ..self
        }
    }
}

impl Default for ProofOptions {
    /// Service defaults: every ceiling set.
    fn default() -> Self {
        Self::unbounded().with_defaults()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(d)? {
            Some(secs) => Duration::try_from_secs_f64(secs).map(Some).map_err(|_| {
                serde::de::Error::custom(format!(
                    "duration must be a non-negative, representable number of seconds, got {}",
                    secs
                ))
            }),
            None => Ok(None),
        }
    }
}

/// A unit of work: proof source plus execution options
#[derive(Clone, Debug)]
pub struct ProofRequest {
    proof: String,
    pub options: ProofOptions,
}

impl ProofRequest {
    pub fn new(proof: impl Into<String>, options: ProofOptions) -> Result<Self> {
        let proof = proof.into();
        if proof.trim().is_empty() {
            return Err(ProofError::Config("proof code cannot be empty".to_string()));
        }
        Ok(Self { proof, options })
    }

    pub fn proof(&self) -> &str {
        &self.proof
    }
}

/// Wire payload written to the prover's stdin
#[derive(Debug, Serialize)]
pub struct ProverCommand<'a> {
    pub cmd: &'a str,
    #[serde(rename = "allTactics")]
    pub all_tactics: bool,
    pub ast: bool,
    pub tactics: bool,
    pub premises: bool,
}

impl<'a> ProverCommand<'a> {
    pub fn new(proof: &'a str, options: &ProofOptions) -> Self {
        Self {
            cmd: proof,
            all_tactics: options.all_tactics,
            ast: options.ast,
            tactics: options.tactics,
            premises: options.premises,
        }
    }
}

/// Proof status - closed set
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProofStatus {
    /// Prover ran to completion and its output was interpreted
    #[serde(rename = "finished")]
    Finished,
    /// Execution did not produce an interpretable output
    #[serde(rename = "error")]
    Error,
}

impl std::fmt::Display for ProofStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProofStatus::Finished => write!(f, "finished"),
            ProofStatus::Error => write!(f, "error"),
        }
    }
}

/// Result payload, keyed by outcome kind
#[derive(Clone, Debug, PartialEq)]
pub enum ProofPayload {
    /// Interpreted prover output (message list preserved unfiltered)
    Output(Value),
    ConcurrencyLimitReached,
    Timeout,
    Cancelled,
    MemoryLimitExceeded,
    CpuTimeLimitExceeded,
    FileSizeLimitExceeded,
    SegmentationFault,
    ProcessKilled { signal: String },
    ProcessError { return_code: i32 },
    ParseFailed {
        raw_output: String,
        parse_error_message: String,
    },
}

impl ProofPayload {
    /// Stable status tag for non-output payloads
    pub fn status_tag(&self) -> Option<&'static str> {
        match self {
            ProofPayload::Output(_) => None,
            ProofPayload::ConcurrencyLimitReached => Some("concurrency_limit_reached"),
            ProofPayload::Timeout => Some("timeout"),
            ProofPayload::Cancelled => Some("cancelled"),
            ProofPayload::MemoryLimitExceeded => Some("memory_limit_exceeded"),
            ProofPayload::CpuTimeLimitExceeded => Some("cpu_time_limit_exceeded"),
            ProofPayload::FileSizeLimitExceeded => Some("file_size_limit_exceeded"),
            ProofPayload::SegmentationFault => Some("segmentation_fault"),
            ProofPayload::ProcessKilled { .. } => Some("process_killed"),
            ProofPayload::ProcessError { .. } => Some("process_error"),
            ProofPayload::ParseFailed { .. } => Some("parse_failed"),
        }
    }

    /// Wire representation handed to the host service
    pub fn to_json(&self) -> Value {
        match self {
            ProofPayload::Output(value) => value.clone(),
            ProofPayload::ProcessKilled { signal } => {
                json!({ "status": "process_killed", "signal": signal })
            }
            ProofPayload::ProcessError { return_code } => {
                json!({ "status": "process_error", "return_code": return_code })
            }
            ProofPayload::ParseFailed {
                raw_output,
                parse_error_message,
            } => json!({
                "status": "parse_failed",
                "raw_output": raw_output,
                "parse_error_message": parse_error_message,
            }),
            other => json!({ "status": other.status_tag() }),
        }
    }

    /// Diagnostic messages carried by prover output, if any
    pub fn messages(&self) -> Option<&Vec<Value>> {
        match self {
            ProofPayload::Output(value) => value.get("messages").and_then(Value::as_array),
            _ => None,
        }
    }
}

impl Serialize for ProofPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Outcome of one proof execution
#[derive(Clone, Debug, Serialize)]
pub struct ProofResult {
    /// Time-ordered unique identifier (UUIDv7)
    pub proof_id: Uuid,
    pub success: bool,
    pub status: ProofStatus,
    pub result: ProofPayload,
    /// Human-readable diagnostics; prover stderr on the finished path
    pub error_message: String,
    /// Wall time from admission request to verdict
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
}

fn serialize_secs<S: Serializer>(value: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(value.as_secs_f64())
}

/// Custom error types for proofbox
#[derive(Error, Debug)]
pub enum ProofError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to start prover {}: {source}", .executable.display())]
    Spawn {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to set resource limits: {0}")]
    SetupFailed(String),

    #[error("Process error: {0}")]
    Process(String),
}

pub type Result<T> = std::result::Result<T, ProofError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_unset_and_zero() {
        let options = ProofOptions {
            timeout: Some(Duration::ZERO),
            memory_limit: Some(0),
            stack_limit: Some(4096),
            ..ProofOptions::unbounded()
        }
        .with_defaults();

        assert_eq!(options.timeout, Some(DEFAULT_TIMEOUT));
        assert_eq!(options.cpu_time_limit, Some(DEFAULT_CPU_TIME_LIMIT));
        assert_eq!(options.memory_limit, Some(DEFAULT_MEMORY_LIMIT));
        assert_eq!(options.stack_limit, Some(4096));
        assert_eq!(options.file_size_limit, Some(DEFAULT_FILE_SIZE_LIMIT));
        assert_eq!(options.open_files_limit, Some(DEFAULT_OPEN_FILES_LIMIT));
    }

    #[test]
    fn test_empty_proof_rejected() {
        assert!(ProofRequest::new("   \n", ProofOptions::default()).is_err());
        let req = ProofRequest::new("theorem t : 1 = 1 := rfl", ProofOptions::default()).unwrap();
        assert_eq!(req.proof(), "theorem t : 1 = 1 := rfl");
    }

    #[test]
    fn test_prover_command_wire_shape() {
        let options = ProofOptions {
            all_tactics: true,
            premises: true,
            ..ProofOptions::default()
        };
        let value = serde_json::to_value(ProverCommand::new("example", &options)).unwrap();
        assert_eq!(
            value,
            json!({
                "cmd": "example",
                "allTactics": true,
                "ast": false,
                "tactics": false,
                "premises": true
            })
        );
    }

    #[test]
    fn test_payload_wire_shapes() {
        assert_eq!(ProofPayload::Timeout.to_json(), json!({"status": "timeout"}));
        assert_eq!(
            ProofPayload::ProcessError { return_code: 2 }.to_json(),
            json!({"status": "process_error", "return_code": 2})
        );
        let output = json!({"env": 0});
        assert_eq!(ProofPayload::Output(output.clone()).to_json(), output);
    }

    #[test]
    fn test_options_deserialize_seconds() {
        let options: ProofOptions =
            serde_json::from_str(r#"{"timeout": 1.5, "memory_limit": 2048, "ast": true}"#).unwrap();
        assert_eq!(options.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(options.memory_limit, Some(2048));
        assert!(options.ast);
        assert_eq!(options.cpu_time_limit, Some(DEFAULT_CPU_TIME_LIMIT));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ProofStatus::Finished.to_string(), "finished");
        assert_eq!(
            serde_json::to_value(ProofStatus::Error).unwrap(),
            json!("error")
        );
    }

    #[test]
    fn test_options_reject_unrepresentable_durations() {
        for raw in [r#"{"timeout": 1e20}"#, r#"{"cpu_time_limit": -1}"#, r#"{"timeout": 1e308}"#] {
            let err = serde_json::from_str::<ProofOptions>(raw).unwrap_err();
            assert!(err.to_string().contains("representable"), "{}: {}", raw, err);
        }
    }
}
