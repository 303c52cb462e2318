use crate::config::types::{EngineConfig, ProofError, ProofOptions, Result};
use crate::exec::context::{ExecutionContext, Interruption};
use crate::kernel::rlimit::{AppliedLimit, ResourceLimiter};
use crate::kernel::signal::GroupGuard;
use crate::utils::output::{finish_collector, spawn_collector, CapturedStream, Collector, OutputLimits};
/// Prover Invocation Lifecycle
///
/// One spawn-run-reap cycle of the external prover, expressed as a
/// type-state chain so out-of-order transitions do not compile:
///
/// Created -> Started -> LimitsApplied -> InputSent -> ProcessOutcome
///
/// 1. spawn the prover in its own process group (pgid == pid), with the
///    ceilings already set between fork and exec
/// 2. prlimit every requested ceiling as the checked step; any failure
///    kills the group
/// 3. write the request on a writer task while two drain tasks read
///    stdout and stderr, then close stdin
/// 4. wait for exit racing the context deadline and cancellation; on
///    interruption kill the whole group and reap
///
/// Each step consumes the prior state. Only `ProverInvocation<InputSent>`
/// exposes `wait`. From `Started` on, dropping the invocation kills the
/// whole process group, not just the leader.
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// Type-state: command built, nothing running yet
pub struct Created {
    command: Command,
}

/// Type-state: process running, no ceilings yet
pub struct Started {
    group: GroupGuard,
    child: Child,
    pid: u32,
    started_at: Instant,
}

/// Type-state: every requested ceiling is in force
pub struct LimitsApplied {
    group: GroupGuard,
    child: Child,
    pid: u32,
    started_at: Instant,
    limits: Vec<AppliedLimit>,
}

/// Type-state: request handed to the writer, drains running
pub struct InputSent {
    group: GroupGuard,
    child: Child,
    pid: u32,
    started_at: Instant,
    limits: Vec<AppliedLimit>,
    writer: JoinHandle<std::io::Result<()>>,
    stdout: Option<Collector>,
    stderr: Option<Collector>,
    collection_grace: Duration,
}

/// One external prover invocation with type-state tracking
pub struct ProverInvocation<S> {
    /// Executable being run (for diagnostics)
    pub executable: PathBuf,
    /// Correlation label used in log lines
    pub label: String,
    state: S,
}

/// How the process ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Exited on its own with a status code
    Exited { code: i32 },
    /// Killed by a signal the engine did not send
    Signaled { signal: i32 },
    /// Killed by the engine after the deadline passed
    TimedOut { after: Duration },
    /// Killed by the engine after external cancellation
    Cancelled,
}

impl Termination {
    fn from_status(status: ExitStatus) -> Result<Self> {
        if let Some(code) = status.code() {
            return Ok(Termination::Exited { code });
        }
        if let Some(signal) = status.signal() {
            return Ok(Termination::Signaled { signal });
        }
        Err(ProofError::Process(format!(
            "unrecognised wait status: {}",
            status
        )))
    }
}

/// Everything observed about a finished invocation
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub pid: u32,
    pub termination: Termination,
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
    pub limits: Vec<AppliedLimit>,
    pub elapsed: Duration,
}

impl ProverInvocation<Created> {
    /// Build the prover command from engine configuration
    pub fn new(config: &EngineConfig, options: &ProofOptions, label: impl Into<String>) -> Self {
        let mut command = Command::new(&config.prover_executable);
        command
            .args(&config.prover_args)
            .current_dir(&config.workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let plan = ResourceLimiter::planned_limits(options);
        if !plan.is_empty() {
            // SAFETY: the hook only calls setrlimit, which is
            // async-signal-safe, over a plan allocated before fork.
            unsafe {
                command.pre_exec(move || {
                    ResourceLimiter::apply_to_current(&plan);
                    Ok(())
                });
            }
        }

        Self {
            executable: config.prover_executable.clone(),
            label: label.into(),
            state: Created { command },
        }
    }

    /// Transition to Started by spawning the process
    pub fn spawn(mut self) -> Result<ProverInvocation<Started>> {
        let child = self
            .state
            .command
            .spawn()
            .map_err(|source| ProofError::Spawn {
                executable: self.executable.clone(),
                source,
            })?;
        let pid = child
            .id()
            .ok_or_else(|| ProofError::Process("spawned prover has no pid".to_string()))?;

        log::debug!(
            "[{}] Spawned {} as pid {} (own process group)",
            self.label,
            self.executable.display(),
            pid
        );

        Ok(ProverInvocation {
            executable: self.executable,
            label: self.label,
            state: Started {
                group: GroupGuard::new(pid),
                child,
                pid,
                started_at: Instant::now(),
            },
        })
    }
}

impl ProverInvocation<Started> {
    /// Transition to LimitsApplied.
    ///
    /// A failed ceiling kills the process group; the prover never runs
    /// unmetered.
    pub fn apply_limits(self, options: &ProofOptions) -> Result<ProverInvocation<LimitsApplied>> {
        let Started {
            mut group,
            mut child,
            pid,
            started_at,
        } = self.state;

        let limits = match ResourceLimiter::apply(pid, options) {
            Ok(limits) => limits,
            Err(e) => {
                log::error!("[{}] {}; killing pid {}", self.label, e, pid);
                group.kill();
                let _ = child.start_kill();
                // kill_on_drop reaps the child in the background
                return Err(e);
            }
        };

        Ok(ProverInvocation {
            executable: self.executable,
            label: self.label,
            state: LimitsApplied {
                group,
                child,
                pid,
                started_at,
                limits,
            },
        })
    }
}

impl ProverInvocation<LimitsApplied> {
    /// Transition to InputSent.
    ///
    /// Writing and draining run as independent tasks; a sequential
    /// write-then-read could deadlock once either pipe buffer fills.
    pub fn send_input(self, payload: Vec<u8>, output_limits: &OutputLimits) -> ProverInvocation<InputSent> {
        let LimitsApplied {
            group,
            mut child,
            pid,
            started_at,
            limits,
        } = self.state;

        let stdin = child.stdin.take();
        let label = self.label.clone();
        let writer = tokio::spawn(async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            stdin.write_all(&payload).await?;
            stdin.shutdown().await?;
            log::debug!("[{}] Request written ({} bytes), stdin closed", label, payload.len());
            Ok(())
        });

        let stdout = spawn_collector(child.stdout.take(), output_limits.stdout_limit);
        let stderr = spawn_collector(child.stderr.take(), output_limits.stderr_limit);

        ProverInvocation {
            executable: self.executable,
            label: self.label,
            state: InputSent {
                group,
                child,
                pid,
                started_at,
                limits,
                writer,
                stdout,
                stderr,
                collection_grace: output_limits.collection_timeout(),
            },
        }
    }
}

impl ProverInvocation<InputSent> {
    /// Wait for exit, racing the context's deadline and cancellation.
    ///
    /// The process group is killed on every path out of here, so stray
    /// descendants never outlive the invocation.
    pub async fn wait(self, ctx: &ExecutionContext) -> Result<ProcessOutcome> {
        let InputSent {
            mut group,
            mut child,
            pid,
            started_at,
            limits,
            writer,
            stdout,
            stderr,
            collection_grace,
        } = self.state;
        let label = self.label;

        enum Waited {
            Exited(std::io::Result<ExitStatus>),
            Interrupted(Interruption),
        }

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            interruption = ctx.done() => Waited::Interrupted(interruption),
        };

        let termination = match waited {
            Waited::Exited(Ok(status)) => {
                group.kill();
                Termination::from_status(status)
            }
            Waited::Exited(Err(e)) => {
                group.kill();
                Err(ProofError::Io(e))
            }
            Waited::Interrupted(interruption) => {
                log::info!(
                    "[{}] {:?} after {:?}; killing process group {}",
                    label,
                    interruption,
                    started_at.elapsed(),
                    pid
                );
                group.kill();
                let _ = child.start_kill();
                child.wait().await?;
                Ok(match interruption {
                    Interruption::DeadlineExceeded => Termination::TimedOut {
                        after: started_at.elapsed(),
                    },
                    Interruption::Cancelled => Termination::Cancelled,
                })
            }
        };

        let (write_result, stdout, stderr) = tokio::join!(
            finish_writer(writer, collection_grace),
            finish_collector(stdout, collection_grace),
            finish_collector(stderr, collection_grace),
        );
        let termination = termination?;

        match write_result {
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                log::warn!("[{}] Prover closed stdin before reading the full request", label);
            }
            Err(e) if matches!(termination, Termination::Exited { .. }) => {
                return Err(ProofError::Io(e));
            }
            Err(e) => log::debug!("[{}] Request write interrupted: {}", label, e),
            Ok(()) => {}
        }

        let elapsed = started_at.elapsed();
        log::debug!(
            "[{}] pid {} finished: {:?} in {:?} (stdout {} bytes {}, stderr {} bytes {})",
            label,
            pid,
            termination,
            elapsed,
            stdout.total_bytes,
            stdout.integrity,
            stderr.total_bytes,
            stderr.integrity
        );

        Ok(ProcessOutcome {
            pid,
            termination,
            stdout,
            stderr,
            limits,
            elapsed,
        })
    }
}

async fn finish_writer(
    mut writer: JoinHandle<std::io::Result<()>>,
    grace: Duration,
) -> std::io::Result<()> {
    match tokio::time::timeout(grace, &mut writer).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("request writer task failed: {}", join_error),
        )),
        Err(_) => {
            writer.abort();
            Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "request writer did not finish",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_config(script: &str) -> EngineConfig {
        EngineConfig {
            prover_executable: PathBuf::from("/bin/sh"),
            workspace: std::env::temp_dir(),
            prover_args: vec!["-c".to_string(), script.to_string()],
            ..EngineConfig::default()
        }
    }

    async fn run(script: &str, ctx: &ExecutionContext) -> Result<ProcessOutcome> {
        let config = shell_config(script);
        ProverInvocation::new(&config, &ProofOptions::unbounded(), "test")
            .spawn()?
            .apply_limits(&ProofOptions::unbounded())?
            .send_input(b"{\"cmd\":\"x\"}".to_vec(), &config.output_limits)
            .wait(ctx)
            .await
    }

    #[tokio::test]
    async fn test_echoes_input_through_pipes() {
        let outcome = run("cat", &ExecutionContext::background()).await.unwrap();
        assert_eq!(outcome.termination, Termination::Exited { code: 0 });
        assert_eq!(outcome.stdout.data, b"{\"cmd\":\"x\"}");
    }

    #[tokio::test]
    async fn test_nonzero_exit_and_stderr() {
        let outcome = run("echo boom >&2; exit 3", &ExecutionContext::background())
            .await
            .unwrap();
        assert_eq!(outcome.termination, Termination::Exited { code: 3 });
        assert_eq!(outcome.stderr.text().trim(), "boom");
    }

    #[tokio::test]
    async fn test_signal_is_reported() {
        let outcome = run("kill -SEGV $$", &ExecutionContext::background())
            .await
            .unwrap();
        assert_eq!(
            outcome.termination,
            Termination::Signaled {
                signal: libc::SIGSEGV
            }
        );
    }

    #[tokio::test]
    async fn test_deadline_kills_group() {
        let ctx = ExecutionContext::with_timeout(Duration::from_millis(100));
        let outcome = run("sleep 30 & wait", &ctx).await.unwrap();
        assert!(matches!(outcome.termination, Termination::TimedOut { .. }));
        assert!(outcome.elapsed < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancellation_kills_group() {
        let ctx = ExecutionContext::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let outcome = run("sleep 30", &ctx).await.unwrap();
        assert_eq!(outcome.termination, Termination::Cancelled);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_ceilings_in_force_when_spawn_returns() {
        use crate::kernel::rlimit::Ceiling;

        let config = shell_config("sleep 5");
        let options = ProofOptions {
            open_files_limit: Some(64),
            ..ProofOptions::unbounded()
        };
        let started = ProverInvocation::new(&config, &options, "test")
            .spawn()
            .unwrap();

        let limits = ResourceLimiter::current(started.state.pid, Ceiling::OpenFiles).unwrap();
        assert_eq!(limits, (64, 64));
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let config = EngineConfig::new("/nonexistent/prover", std::env::temp_dir());
        let err = ProverInvocation::new(&config, &ProofOptions::unbounded(), "test")
            .spawn()
            .err()
            .unwrap();
        assert!(matches!(err, ProofError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_large_output_does_not_deadlock() {
        // Writes far more than a pipe buffer before reading stdin
        let outcome = run(
            "head -c 1048576 /dev/zero; cat >/dev/null",
            &ExecutionContext::with_timeout(Duration::from_secs(20)),
        )
        .await
        .unwrap();
        assert_eq!(outcome.termination, Termination::Exited { code: 0 });
        assert_eq!(outcome.stdout.total_bytes, 1048576);
    }
}
