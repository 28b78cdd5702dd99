//! The operating system facilities used by this crate, behind a substitutable trait.

use {
    crate::{affinity::CpuMask, error::RtError, priority::RtPriority},
    std::{io, path::Path, time::Duration},
};

/// Process identifier as understood by the kernel. `0` is the calling process.
pub type Pid = libc::pid_t;

/// Handle of a POSIX thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ThreadHandle(libc::pthread_t);

impl ThreadHandle {
    pub fn from_raw(raw: libc::pthread_t) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> libc::pthread_t {
        self.0
    }
}

#[cfg(unix)]
impl<T> From<&std::thread::JoinHandle<T>> for ThreadHandle {
    fn from(handle: &std::thread::JoinHandle<T>) -> Self {
        use std::os::unix::thread::JoinHandleExt;
        Self(handle.as_pthread_t() as libc::pthread_t)
    }
}

/// The subject of an affinity or scheduler operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    Process(Pid),
    Thread(ThreadHandle),
}

/// Kernel facilities needed by [`RtControl`](crate::RtControl).
///
/// Implementations perform exactly one kernel call (or one file access) per method and add no
/// validation of their own. Argument checking, mask and enum translation, and iteration over
/// CPUs all live in `RtControl`, which makes them testable against a fake kernel.
pub trait RtPlatform {
    /// Number of online CPUs as reported by `sysconf(_SC_NPROCESSORS_ONLN)`.
    fn online_cpu_count(&self) -> Result<usize, RtError>;

    /// CPU the calling thread is currently running on.
    fn current_cpu(&self) -> Result<usize, RtError>;

    fn set_affinity(&self, target: Target, mask: &CpuMask) -> Result<(), RtError>;

    fn affinity(&self, target: Target) -> Result<CpuMask, RtError>;

    fn current_thread(&self) -> ThreadHandle;

    /// Kernel task id of the calling thread.
    fn current_tid(&self) -> Pid;

    fn set_nice(&self, who: Pid, nice: i32) -> Result<(), RtError>;

    fn nice(&self, who: Pid) -> Result<i32, RtError>;

    fn set_scheduler(&self, target: Target, priority: &RtPriority) -> Result<(), RtError>;

    fn scheduler(&self, target: Target) -> Result<RtPriority, RtError>;

    /// Reads a sysfs/procfs attribute.
    fn read_attribute(&self, path: &Path) -> io::Result<String>;

    /// Writes a sysfs/procfs attribute. The file must already exist.
    fn write_attribute(&self, path: &Path, value: &str) -> io::Result<()>;

    /// Bytes of stack left below the current frame of the calling thread.
    fn stack_remaining(&self) -> Result<usize, RtError>;

    /// Locks all current and future pages of the process.
    fn lock_all_memory(&self) -> Result<(), RtError>;

    fn unlock_all_memory(&self) -> Result<(), RtError>;

    /// Current value of the monotonic clock.
    fn monotonic_now(&self) -> Result<Duration, RtError>;

    /// Sleeps until the monotonic clock reaches `deadline`.
    fn sleep_until(&self, deadline: Duration) -> Result<(), RtError>;
}
