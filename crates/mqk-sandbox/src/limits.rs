use std::time::Duration;

use mqk_config::SandboxConfig;

/// Descriptors the worker may hold: stdio plus a few for the loader.
const MAX_OPEN_FILES: u64 = 16;

// The resource parameter type differs between libc targets, so the
// constant is passed straight through.
#[cfg(unix)]
macro_rules! set_rlimit {
    ($resource:expr, $value:expr) => {{
        let lim = libc::rlimit {
            rlim_cur: $value as libc::rlim_t,
            rlim_max: $value as libc::rlim_t,
        };
        // SAFETY: setrlimit reads the struct and touches no memory of ours.
        if unsafe { libc::setrlimit($resource, &lim) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }};
}

/// rlimits applied to the worker between fork and exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Always strictly above the wall-clock timeout, so the watchdog fires
    /// first and a spin loop is classified as a timeout rather than SIGXCPU.
    pub cpu_secs: u64,
    pub address_space_bytes: u64,
    pub open_files: u64,
}

impl ResourceLimits {
    pub fn for_timeout(timeout: Duration, memory_limit_mb: u64) -> Self {
        Self {
            cpu_secs: cpu_ceiling_secs(timeout),
            address_space_bytes: memory_limit_mb.saturating_mul(1024 * 1024),
            open_files: MAX_OPEN_FILES,
        }
    }

    pub fn from_config(cfg: &SandboxConfig) -> Self {
        Self::for_timeout(cfg.timeout(), cfg.memory_limit_mb)
    }

    /// Runs in the forked child before exec: only async-signal-safe calls.
    /// No file may be created or grown (`RLIMIT_FSIZE = 0`) and no core is
    /// dumped.
    #[cfg(unix)]
    pub fn apply(&self) -> std::io::Result<()> {
        set_rlimit!(libc::RLIMIT_CPU, self.cpu_secs);
        set_rlimit!(libc::RLIMIT_AS, self.address_space_bytes);
        set_rlimit!(libc::RLIMIT_FSIZE, 0);
        set_rlimit!(libc::RLIMIT_NOFILE, self.open_files);
        set_rlimit!(libc::RLIMIT_CORE, 0);
        Ok(())
    }
}

/// `ceil(timeout) + 1` whole seconds.
pub fn cpu_ceiling_secs(timeout: Duration) -> u64 {
    let whole = timeout.as_secs();
    let ceil = if timeout.subsec_nanos() > 0 { whole + 1 } else { whole };
    ceil + 1
}
