//! Kernel resource limits installed in the child before the interpreter
//! image is loaded.
//!
//! The limits are applied between `fork` and `exec` so the parent process is
//! never affected. Exceeding the CPU cap raises a kernel signal in the
//! child; exceeding the address-space cap makes allocations fail; the
//! process cap stops user code from forking; the file-size cap refuses
//! oversized writes.

use std::io;

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Hard caps enforced on the sandboxed interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// CPU time, seconds.
    pub cpu_time_secs: u64,
    /// Address space, mebibytes.
    pub address_space_mib: u64,
    /// Maximum number of processes.
    pub max_processes: u64,
    /// Maximum size of any written file, mebibytes.
    pub max_file_size_mib: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_time_secs: 5,
            address_space_mib: 256,
            max_processes: 1,
            max_file_size_mib: 10,
        }
    }
}

impl ResourceLimits {
    /// Installs the limits and detaches the child into its own session so
    /// the parent can kill the whole process group on timeout.
    ///
    /// Runs between `fork` and `exec`; only async-signal-safe calls are
    /// made.
    ///
    /// # Errors
    ///
    /// Returns the underlying errno when any `setrlimit` or `setsid` call is
    /// refused.
    #[cfg(unix)]
    pub(super) fn install(&self) -> io::Result<()> {
        use nix::sys::resource::{Resource, setrlimit};
        use nix::unistd::setsid;

        setsid()?;
        setrlimit(Resource::RLIMIT_CPU, self.cpu_time_secs, self.cpu_time_secs)?;
        let address_space = self.address_space_mib.saturating_mul(BYTES_PER_MIB);
        setrlimit(Resource::RLIMIT_AS, address_space, address_space)?;
        let file_size = self.max_file_size_mib.saturating_mul(BYTES_PER_MIB);
        setrlimit(Resource::RLIMIT_FSIZE, file_size, file_size)?;
        #[cfg(any(
            target_os = "linux",
            target_os = "android",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "dragonfly",
        ))]
        setrlimit(
            Resource::RLIMIT_NPROC,
            self.max_processes,
            self.max_processes,
        )?;
        Ok(())
    }
}
