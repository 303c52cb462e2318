use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
/// Signal taxonomy and process-group termination
///
/// Kernel-enforced ceilings surface as specific terminating signals:
/// RLIMIT_CPU raises SIGXCPU, RLIMIT_FSIZE raises SIGXFSZ, stack exhaustion
/// under RLIMIT_STACK faults with SIGSEGV, and address-space exhaustion is
/// commonly followed by the OOM killer's SIGKILL.
use nix::unistd::Pid;

/// Classified terminating signal, in precedence order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGKILL not sent by the engine
    MemoryExhaustion,
    /// SIGXCPU
    CpuTimeLimit,
    /// SIGXFSZ
    FileSizeLimit,
    /// SIGSEGV
    SegmentationFault,
    /// Anything else
    Other(i32),
}

impl SignalKind {
    pub fn classify(raw_signal: i32) -> Self {
        match Signal::try_from(raw_signal) {
            Ok(Signal::SIGKILL) => SignalKind::MemoryExhaustion,
            Ok(Signal::SIGXCPU) => SignalKind::CpuTimeLimit,
            Ok(Signal::SIGXFSZ) => SignalKind::FileSizeLimit,
            Ok(Signal::SIGSEGV) => SignalKind::SegmentationFault,
            _ => SignalKind::Other(raw_signal),
        }
    }
}

/// Human-readable signal name (`SIGTERM`), falling back to the number
pub fn signal_name(raw_signal: i32) -> String {
    match Signal::try_from(raw_signal) {
        Ok(sig) => sig.as_str().to_string(),
        Err(_) => format!("signal {}", raw_signal),
    }
}

/// SIGKILL the whole process group led by `pgid`.
///
/// Returns true when a signal was delivered. A group that no longer
/// exists is not an error.
pub fn kill_process_group(pgid: u32) -> bool {
    let pid = Pid::from_raw(pgid as libc::pid_t);
    match signal::killpg(pid, Signal::SIGKILL) {
        Ok(()) => {
            debug!("SIGKILL sent to process group {}", pgid);
            true
        }
        Err(Errno::ESRCH) => false,
        Err(e) => {
            warn!("killpg({}) failed: {}; falling back to direct kill", pgid, e);
            signal::kill(pid, Signal::SIGKILL).is_ok()
        }
    }
}

/// Kills a process group once: explicitly via [`GroupGuard::kill`], or on
/// drop if that never happened.
#[derive(Debug)]
pub struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    pub fn new(pgid: u32) -> Self {
        Self { pgid: Some(pgid) }
    }

    /// Kill the group now; later calls and the drop are no-ops
    pub fn kill(&mut self) -> bool {
        match self.pgid.take() {
            Some(pgid) => kill_process_group(pgid),
            None => false,
        }
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            debug!("Process group {} dropped while live; killing", pgid);
            kill_process_group(pgid);
        }
    }
}
