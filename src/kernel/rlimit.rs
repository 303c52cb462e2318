use crate::config::types::{ProofError, ProofOptions, Result};
/// Per-process resource ceilings
///
/// Ceilings are applied to an already-spawned prover with prlimit(2) before
/// any input reaches it. Hard limits match the soft ones so the prover
/// cannot raise them back, except RLIMIT_CPU: the kernel sends SIGKILL
/// instead of SIGXCPU once the hard CPU limit is hit, so that hard limit
/// sits one second above the soft one. On platforms without prlimit the
/// limiter fails closed whenever a ceiling is requested.
use log::debug;

/// One ceiling that was set on a process
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppliedLimit {
    pub name: &'static str,
    pub value: u64,
}

/// Resource limiter for prover processes
pub struct ResourceLimiter;

impl ResourceLimiter {
    /// Collect the ceilings requested by `options`. Unset and zero values
    /// are skipped.
    pub fn planned_limits(options: &ProofOptions) -> Vec<(Ceiling, u64)> {
        let mut plan = Vec::new();

        if let Some(cpu) = options.cpu_time_limit.filter(|d| !d.is_zero()) {
            // RLIMIT_CPU has whole-second granularity; never round down to 0
            let secs = cpu.as_secs() + u64::from(cpu.subsec_nanos() > 0);
            plan.push((Ceiling::CpuTime, secs.max(1)));
        }
        if let Some(bytes) = options.memory_limit.filter(|v| *v > 0) {
            plan.push((Ceiling::AddressSpace, bytes));
        }
        if let Some(bytes) = options.stack_limit.filter(|v| *v > 0) {
            plan.push((Ceiling::Stack, bytes));
        }
        if let Some(bytes) = options.file_size_limit.filter(|v| *v > 0) {
            plan.push((Ceiling::FileSize, bytes));
        }
        if let Some(count) = options.open_files_limit.filter(|v| *v > 0) {
            plan.push((Ceiling::OpenFiles, count));
        }

        plan
    }

    /// Apply every requested ceiling to `pid`.
    ///
    /// Stops at the first failure; the caller is responsible for killing
    /// the process in that case.
    pub fn apply(pid: u32, options: &ProofOptions) -> Result<Vec<AppliedLimit>> {
        let plan = Self::planned_limits(options);
        let mut applied = Vec::with_capacity(plan.len());

        for (ceiling, value) in plan {
            set_process_limit(pid, ceiling, value)?;
            debug!("Applied {}={} to pid {}", ceiling.name(), value, pid);
            applied.push(AppliedLimit {
                name: ceiling.name(),
                value,
            });
        }

        Ok(applied)
    }

    /// Apply `plan` to the calling process with setrlimit(2), ignoring
    /// failures.
    ///
    /// Meant for the window between fork and exec: it neither allocates
    /// nor logs. The checked `apply` on the spawned pid still follows.
    #[cfg(target_os = "linux")]
    pub fn apply_to_current(plan: &[(Ceiling, u64)]) {
        for &(ceiling, value) in plan {
            let limit = libc::rlimit {
                rlim_cur: value as libc::rlim_t,
                rlim_max: ceiling.hard_limit(value) as libc::rlim_t,
            };
            // SAFETY: limit is a valid rlimit; setrlimit is async-signal-safe.
            unsafe {
                libc::setrlimit(ceiling.resource(), &limit);
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn apply_to_current(_plan: &[(Ceiling, u64)]) {}

    /// Read back the (soft, hard) values of a ceiling on `pid`
    #[cfg(target_os = "linux")]
    pub fn current(pid: u32, ceiling: Ceiling) -> Result<(u64, u64)> {
        let mut old = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: new_limit is null (read-only query); old points to a valid rlimit.
        let rc = unsafe {
            libc::prlimit(
                pid as libc::pid_t,
                ceiling.resource(),
                std::ptr::null(),
                &mut old,
            )
        };
        if rc != 0 {
            return Err(ProofError::SetupFailed(format!(
                "Failed to read {} of pid {}: {}",
                ceiling.name(),
                pid,
                std::io::Error::last_os_error()
            )));
        }
        Ok((old.rlim_cur as u64, old.rlim_max as u64))
    }
}

/// Resource families the limiter controls
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ceiling {
    CpuTime,
    AddressSpace,
    Stack,
    FileSize,
    OpenFiles,
}

impl Ceiling {
    pub fn name(self) -> &'static str {
        match self {
            Ceiling::CpuTime => "RLIMIT_CPU",
            Ceiling::AddressSpace => "RLIMIT_AS",
            Ceiling::Stack => "RLIMIT_STACK",
            Ceiling::FileSize => "RLIMIT_FSIZE",
            Ceiling::OpenFiles => "RLIMIT_NOFILE",
        }
    }

    /// Hard limit paired with a soft limit of `soft`
    pub fn hard_limit(self, soft: u64) -> u64 {
        match self {
            Ceiling::CpuTime => soft.saturating_add(1),
            _ => soft,
        }
    }

    #[cfg(target_os = "linux")]
    fn resource(self) -> libc::__rlimit_resource_t {
        match self {
            Ceiling::CpuTime => libc::RLIMIT_CPU,
            Ceiling::AddressSpace => libc::RLIMIT_AS,
            Ceiling::Stack => libc::RLIMIT_STACK,
            Ceiling::FileSize => libc::RLIMIT_FSIZE,
            Ceiling::OpenFiles => libc::RLIMIT_NOFILE,
        }
    }
}

#[cfg(target_os = "linux")]
fn set_process_limit(pid: u32, ceiling: Ceiling, value: u64) -> Result<()> {
    let limit = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: ceiling.hard_limit(value) as libc::rlim_t,
    };

    // SAFETY: limit is a valid rlimit; old_limit is null so nothing is written back.
    let rc = unsafe {
        libc::prlimit(
            pid as libc::pid_t,
            ceiling.resource(),
            &limit,
            std::ptr::null_mut(),
        )
    };
    if rc == 0 {
        return Ok(());
    }

    Err(ProofError::SetupFailed(format!(
        "Failed to apply {}={} to pid {}: {}",
        ceiling.name(),
        value,
        pid,
        std::io::Error::last_os_error()
    )))
}

#[cfg(not(target_os = "linux"))]
fn set_process_limit(pid: u32, ceiling: Ceiling, value: u64) -> Result<()> {
    Err(ProofError::SetupFailed(format!(
        "Cannot apply {}={} to pid {}: per-process limits are not supported on this platform",
        ceiling.name(),
        value,
        pid
    )))
}
