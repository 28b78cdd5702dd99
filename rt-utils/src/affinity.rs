//! Current CPU and CPU affinity of processes and threads.

use {
    crate::{
        control::RtControl,
        error::RtError,
        platform::{Pid, RtPlatform, Target, ThreadHandle},
    },
    log::debug,
};

/// Maximum number of CPUs that fit in a kernel CPU mask.
///
/// This is the standard Linux value defined in glibc. The kernel itself supports more
/// CPUs, but the cpu_set_t structure in glibc is fixed at this size.
pub const CPU_SETSIZE: usize = 1024;

const WORD_BITS: usize = u64::BITS as usize;

/// A set of logical CPUs, the platform-neutral form of `cpu_set_t`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CpuMask {
    words: [u64; CPU_SETSIZE / WORD_BITS],
}

impl CpuMask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `cpu` to the mask. Returns `false` if it cannot be represented.
    pub fn set(&mut self, cpu: usize) -> bool {
        if cpu >= CPU_SETSIZE {
            return false;
        }
        self.words[cpu / WORD_BITS] |= 1u64 << (cpu % WORD_BITS);
        true
    }

    pub fn contains(&self, cpu: usize) -> bool {
        cpu < CPU_SETSIZE && self.words[cpu / WORD_BITS] & (1u64 << (cpu % WORD_BITS)) != 0
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&word| word == 0)
    }

    /// CPUs in the mask, in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..CPU_SETSIZE).filter(|&cpu| self.contains(cpu))
    }
}

/// Builds a mask from the representable CPUs of the iterator; the others are dropped.
impl FromIterator<usize> for CpuMask {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut mask = Self::new();
        for cpu in iter {
            mask.set(cpu);
        }
        mask
    }
}

/// Builds the mask for a caller-supplied CPU list, where negative entries are sentinels.
fn mask_from_cpu_list(cpus: impl IntoIterator<Item = i32>) -> CpuMask {
    let mut mask = CpuMask::new();
    for cpu in cpus {
        let Ok(cpu) = usize::try_from(cpu) else {
            continue;
        };
        if !mask.set(cpu) {
            debug!("ignoring CPU {cpu}: beyond CPU_SETSIZE ({CPU_SETSIZE})");
        }
    }
    mask
}

impl<P: RtPlatform> RtControl<P> {
    /// CPU the calling process is running on at the time of the call.
    ///
    /// The value may be stale as soon as it is returned unless the caller is pinned to a
    /// single CPU.
    pub fn process_current_cpu(&self) -> Result<usize, RtError> {
        self.platform().current_cpu()
    }

    /// CPU the calling thread is running on at the time of the call.
    pub fn thread_current_cpu(&self) -> Result<usize, RtError> {
        self.platform().current_cpu()
    }

    /// Set the CPU affinity of a process (`0` for the calling process).
    ///
    /// Negative entries are ignored, as are entries that do not fit a kernel CPU mask.
    /// Duplicates are harmless.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::Io`] if the system call fails, e.g. `EINVAL` when the mask holds
    /// no online CPU or `EPERM` for another user's process.
    pub fn set_process_affinity(
        &self,
        pid: Pid,
        cpus: impl IntoIterator<Item = i32>,
    ) -> Result<(), RtError> {
        self.set_affinity(Target::Process(pid), cpus)
    }

    /// Set the CPU affinity of a thread. See [`RtControl::set_process_affinity`].
    pub fn set_thread_affinity(
        &self,
        thread: ThreadHandle,
        cpus: impl IntoIterator<Item = i32>,
    ) -> Result<(), RtError> {
        self.set_affinity(Target::Thread(thread), cpus)
    }

    fn set_affinity(
        &self,
        target: Target,
        cpus: impl IntoIterator<Item = i32>,
    ) -> Result<(), RtError> {
        let mask = mask_from_cpu_list(cpus);
        debug!("setting affinity of {target:?} to {:?}", mask.iter().collect::<Vec<_>>());
        self.platform().set_affinity(target, &mask)
    }

    /// Report the online CPUs a process may run on into `cpus`, returning their count.
    ///
    /// CPUs are reported in ascending order. Passing `None` only counts them, which lets the
    /// caller size a buffer for a second call.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::BufferTooSmall`] if `cpus` has fewer slots than there are online
    /// CPUs. Nothing is written in that case.
    /// Returns [`RtError::Io`] if the system call fails.
    pub fn process_affinity_into(
        &self,
        pid: Pid,
        cpus: Option<&mut [usize]>,
    ) -> Result<usize, RtError> {
        self.affinity_into(Target::Process(pid), cpus)
    }

    /// Report the online CPUs a thread may run on. See [`RtControl::process_affinity_into`].
    pub fn thread_affinity_into(
        &self,
        thread: ThreadHandle,
        cpus: Option<&mut [usize]>,
    ) -> Result<usize, RtError> {
        self.affinity_into(Target::Thread(thread), cpus)
    }

    /// Sorted list of the online CPUs a process may run on.
    pub fn process_affinity(&self, pid: Pid) -> Result<Vec<usize>, RtError> {
        self.affinity(Target::Process(pid))
    }

    /// Sorted list of the online CPUs a thread may run on.
    pub fn thread_affinity(&self, thread: ThreadHandle) -> Result<Vec<usize>, RtError> {
        self.affinity(Target::Thread(thread))
    }

    fn affinity(&self, target: Target) -> Result<Vec<usize>, RtError> {
        let mask = self.platform().affinity(target)?;
        Ok(self
            .online_cpus()?
            .into_iter()
            .filter(|&cpu| mask.contains(cpu))
            .collect())
    }

    fn affinity_into(&self, target: Target, cpus: Option<&mut [usize]>) -> Result<usize, RtError> {
        let online = self.online_cpus()?;
        if let Some(cpus) = cpus.as_deref() {
            if cpus.len() < online.len() {
                return Err(RtError::BufferTooSmall {
                    capacity: cpus.len(),
                    required: online.len(),
                });
            }
        }

        let mask = self.platform().affinity(target)?;
        let allowed = online.into_iter().filter(|&cpu| mask.contains(cpu));
        let count = match cpus {
            Some(cpus) => cpus
                .iter_mut()
                .zip(allowed)
                .map(|(slot, cpu)| *slot = cpu)
                .count(),
            None => allowed.count(),
        };
        Ok(count)
    }
}

/// CPU the calling process is running on. See [`RtControl::process_current_cpu`].
pub fn process_current_cpu() -> Result<usize, RtError> {
    RtControl::system().process_current_cpu()
}

/// CPU the calling thread is running on. See [`RtControl::thread_current_cpu`].
pub fn thread_current_cpu() -> Result<usize, RtError> {
    RtControl::system().thread_current_cpu()
}

/// Set CPU affinity for a process (`0` for the calling process).
///
/// # Examples
///
/// ```no_run
/// # use agave_rt_utils::*;
/// # fn main() -> Result<(), RtError> {
/// // Pin to CPU 0
/// set_process_affinity(0, [0])?;
///
/// // Pin to multiple CPUs, -1 entries are ignored
/// set_process_affinity(0, [0, 1, -1])?;
/// # Ok(())
/// # }
/// ```
pub fn set_process_affinity(pid: Pid, cpus: impl IntoIterator<Item = i32>) -> Result<(), RtError> {
    RtControl::system().set_process_affinity(pid, cpus)
}

/// Set CPU affinity for a thread. See [`RtControl::set_thread_affinity`].
pub fn set_thread_affinity(
    thread: ThreadHandle,
    cpus: impl IntoIterator<Item = i32>,
) -> Result<(), RtError> {
    RtControl::system().set_thread_affinity(thread, cpus)
}

/// Report the CPU affinity of a process into a caller buffer.
///
/// # Examples
///
/// ```no_run
/// # use agave_rt_utils::*;
/// # fn main() -> Result<(), RtError> {
/// let count = process_affinity_into(0, None)?;
/// let mut cpus = vec![0; cpu_count()?];
/// let count = process_affinity_into(0, Some(&mut cpus))?;
/// println!("Process can run on CPUs: {:?}", &cpus[..count]);
/// # Ok(())
/// # }
/// ```
pub fn process_affinity_into(pid: Pid, cpus: Option<&mut [usize]>) -> Result<usize, RtError> {
    RtControl::system().process_affinity_into(pid, cpus)
}

/// Report the CPU affinity of a thread into a caller buffer.
pub fn thread_affinity_into(
    thread: ThreadHandle,
    cpus: Option<&mut [usize]>,
) -> Result<usize, RtError> {
    RtControl::system().thread_affinity_into(thread, cpus)
}

/// Get the CPU affinity of a process as a sorted list of online CPUs.
pub fn process_affinity(pid: Pid) -> Result<Vec<usize>, RtError> {
    RtControl::system().process_affinity(pid)
}

/// Get the CPU affinity of a thread as a sorted list of online CPUs.
pub fn thread_affinity(thread: ThreadHandle) -> Result<Vec<usize>, RtError> {
    RtControl::system().thread_affinity(thread)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::fake::{FakePlatform, FAKE_PID},
        assert_matches::assert_matches,
    };

    #[test]
    fn test_cpu_mask() {
        let mut mask = CpuMask::new();
        assert!(mask.is_empty());
        assert!(mask.set(0));
        assert!(mask.set(64));
        assert!(mask.set(CPU_SETSIZE - 1));
        assert!(!mask.set(CPU_SETSIZE));
        assert!(mask.contains(64));
        assert!(!mask.contains(1));
        assert!(!mask.contains(CPU_SETSIZE));
        assert_eq!(mask.count(), 3);
        assert_eq!(
            mask.iter().collect::<Vec<_>>(),
            vec![0, 64, CPU_SETSIZE - 1]
        );
    }

    #[test]
    fn test_mask_from_cpu_list_ignores_sentinels() {
        let mask = mask_from_cpu_list([3, -1, 1, 3, i32::MAX, -20]);
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_set_then_get_affinity() {
        let control = RtControl::new(FakePlatform::new(4));
        control
            .set_process_affinity(0, [3, 1, 1, -1, 9, 2000])
            .unwrap();
        assert_eq!(control.process_affinity(0).unwrap(), vec![1, 3]);
        assert_eq!(control.process_affinity(FAKE_PID).unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_thread_affinity_is_per_thread() {
        let control = RtControl::new(FakePlatform::new(4));
        let thread = control.platform().current_thread();
        control.set_thread_affinity(thread, [2]).unwrap();
        assert_eq!(control.thread_affinity(thread).unwrap(), vec![2]);
        assert_eq!(control.process_affinity(0).unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_set_affinity_without_online_cpu() {
        let control = RtControl::new(FakePlatform::new(2));
        let err = control.set_process_affinity(0, [-1, 5]).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
        assert_eq!(control.process_affinity(0).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_count_probe_matches_buffer() {
        let control = RtControl::new(FakePlatform::new(6));
        control.set_process_affinity(0, [5, 0, 2]).unwrap();

        let count = control.process_affinity_into(0, None).unwrap();
        let mut cpus = vec![usize::MAX; 6];
        assert_eq!(
            control.process_affinity_into(0, Some(&mut cpus)).unwrap(),
            count
        );
        assert_eq!(count, 3);
        assert_eq!(&cpus[..count], &[0, 2, 5]);
        assert!(cpus[count..].iter().all(|&cpu| cpu == usize::MAX));
    }

    #[test]
    fn test_undersized_buffer_is_rejected_without_writes() {
        let control = RtControl::new(FakePlatform::new(4));
        control.set_process_affinity(0, [0]).unwrap();

        // one CPU is allowed but the buffer must still cover every online CPU
        let mut cpus = [usize::MAX; 3];
        assert_matches!(
            control.process_affinity_into(0, Some(&mut cpus)),
            Err(RtError::BufferTooSmall {
                capacity: 3,
                required: 4
            })
        );
        assert_eq!(cpus, [usize::MAX; 3]);
    }

    #[test]
    fn test_affinity_skips_offline_cpus() {
        let platform = FakePlatform::new(8);
        platform.set_attribute("/sys/devices/system/cpu/online", "0-1,6-7\n");
        let control = RtControl::new(platform);
        control.set_process_affinity(0, [1, 2, 6]).unwrap();
        assert_eq!(control.process_affinity(0).unwrap(), vec![1, 6]);

        let mut cpus = [0; 4];
        assert_eq!(
            control.process_affinity_into(0, Some(&mut cpus)).unwrap(),
            2
        );
        assert_eq!(&cpus[..2], &[1, 6]);
    }

    #[test]
    fn test_current_cpu() {
        let control = RtControl::new(FakePlatform::new(4));
        control.platform().set_current_cpu(3);
        assert_eq!(control.process_current_cpu().unwrap(), 3);
        assert_eq!(control.thread_current_cpu().unwrap(), 3);
    }
}
