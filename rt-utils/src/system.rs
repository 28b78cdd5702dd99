//! [`RtPlatform`] implementation backed by the running kernel.

use {
    crate::{
        affinity::CpuMask,
        error::RtError,
        platform::{Pid, RtPlatform, Target, ThreadHandle},
        priority::RtPriority,
    },
    std::{io, path::Path, time::Duration},
};
#[cfg(target_os = "linux")]
use {
    crate::{affinity::CPU_SETSIZE, priority::SchedPolicy},
    std::{fs, fs::OpenOptions, io::Write},
};

/// The real operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemPlatform;

#[cfg(target_os = "linux")]
fn to_cpu_set(mask: &CpuMask) -> libc::cpu_set_t {
    // safety: cpu_set_t is a POD type, zero-initialization is standard
    let mut cpu_set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    for cpu in mask.iter() {
        // safety: CpuMask never holds a CPU >= CPU_SETSIZE
        unsafe { libc::CPU_SET(cpu, &mut cpu_set) };
    }
    cpu_set
}

#[cfg(target_os = "linux")]
fn from_cpu_set(cpu_set: &libc::cpu_set_t) -> CpuMask {
    (0..CPU_SETSIZE)
        // safety: cpu < CPU_SETSIZE
        .filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, cpu_set) })
        .collect()
}

/// Maps a pthread-style return code (the error number itself) to a result.
#[cfg(target_os = "linux")]
fn check_pthread(ret: libc::c_int) -> Result<(), RtError> {
    if ret != 0 {
        return Err(RtError::Io(io::Error::from_raw_os_error(ret)));
    }
    Ok(())
}

/// Maps a libc-style return code (`-1` and `errno`) to a result.
#[cfg(target_os = "linux")]
fn check_errno(ret: libc::c_int) -> Result<libc::c_int, RtError> {
    if ret == -1 {
        return Err(RtError::Io(io::Error::last_os_error()));
    }
    Ok(ret)
}

#[cfg(target_os = "linux")]
fn sched_param(priority: &RtPriority) -> Result<libc::sched_param, RtError> {
    let sched_priority = libc::c_int::try_from(priority.priority)
        .map_err(|_| RtError::InvalidRtPriority(priority.priority))?;
    Ok(libc::sched_param { sched_priority })
}

#[cfg(target_os = "linux")]
fn rt_priority(raw_policy: libc::c_int, param: &libc::sched_param) -> Result<RtPriority, RtError> {
    let policy = SchedPolicy::from_raw(raw_policy & !libc::SCHED_RESET_ON_FORK)
        .ok_or(RtError::UnknownPolicy(raw_policy))?;
    // a negative priority is never reported by the kernel
    let priority = u32::try_from(param.sched_priority).unwrap_or_default();
    Ok(RtPriority { policy, priority })
}

#[cfg(target_os = "linux")]
impl RtPlatform for SystemPlatform {
    fn online_cpu_count(&self) -> Result<usize, RtError> {
        // safety: sysconf is safe to call
        let count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if count <= 0 {
            return Err(RtError::Io(io::Error::last_os_error()));
        }
        Ok(count as usize)
    }

    fn current_cpu(&self) -> Result<usize, RtError> {
        // safety: sched_getcpu has no preconditions
        let cpu = check_errno(unsafe { libc::sched_getcpu() })?;
        Ok(cpu as usize)
    }

    fn set_affinity(&self, target: Target, mask: &CpuMask) -> Result<(), RtError> {
        let cpu_set = to_cpu_set(mask);
        let size = std::mem::size_of::<libc::cpu_set_t>();
        match target {
            Target::Process(pid) => {
                // safety: cpu_set is a valid, initialized cpu_set_t of `size` bytes
                check_errno(unsafe { libc::sched_setaffinity(pid, size, &cpu_set) })?;
                Ok(())
            }
            Target::Thread(thread) => {
                // safety: as above; an invalid thread handle is reported as ESRCH
                check_pthread(unsafe {
                    libc::pthread_setaffinity_np(thread.as_raw(), size, &cpu_set)
                })
            }
        }
    }

    fn affinity(&self, target: Target) -> Result<CpuMask, RtError> {
        // safety: cpu_set_t is a POD type, zero-initialization is standard
        let mut cpu_set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        let size = std::mem::size_of::<libc::cpu_set_t>();
        match target {
            Target::Process(pid) => {
                // safety: cpu_set is writable and `size` bytes long
                check_errno(unsafe { libc::sched_getaffinity(pid, size, &mut cpu_set) })?;
            }
            Target::Thread(thread) => {
                // safety: as above
                check_pthread(unsafe {
                    libc::pthread_getaffinity_np(thread.as_raw(), size, &mut cpu_set)
                })?;
            }
        }
        Ok(from_cpu_set(&cpu_set))
    }

    fn current_thread(&self) -> ThreadHandle {
        // safety: pthread_self always succeeds
        ThreadHandle::from_raw(unsafe { libc::pthread_self() })
    }

    fn current_tid(&self) -> Pid {
        // safety: gettid always succeeds
        unsafe { libc::syscall(libc::SYS_gettid) as Pid }
    }

    fn set_nice(&self, who: Pid, nice: i32) -> Result<(), RtError> {
        // safety: setpriority has no memory preconditions
        check_errno(unsafe { libc::setpriority(libc::PRIO_PROCESS, who as libc::id_t, nice) })?;
        Ok(())
    }

    fn nice(&self, who: Pid) -> Result<i32, RtError> {
        // -1 is a legitimate niceness, so errno has to be cleared first to tell it apart
        // safety: __errno_location points to the calling thread's errno
        unsafe { *libc::__errno_location() = 0 };
        // safety: getpriority has no memory preconditions
        let nice = unsafe { libc::getpriority(libc::PRIO_PROCESS, who as libc::id_t) };
        if nice == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error().is_some_and(|errno| errno != 0) {
                return Err(RtError::Io(err));
            }
        }
        Ok(nice)
    }

    fn set_scheduler(&self, target: Target, priority: &RtPriority) -> Result<(), RtError> {
        let param = sched_param(priority)?;
        let policy = priority.policy.as_raw();
        match target {
            Target::Process(pid) => {
                // safety: param is a valid sched_param
                check_errno(unsafe { libc::sched_setscheduler(pid, policy, &param) })?;
                Ok(())
            }
            Target::Thread(thread) => {
                // safety: param is a valid sched_param
                check_pthread(unsafe {
                    libc::pthread_setschedparam(thread.as_raw(), policy, &param)
                })
            }
        }
    }

    fn scheduler(&self, target: Target) -> Result<RtPriority, RtError> {
        let mut param = libc::sched_param { sched_priority: 0 };
        let policy = match target {
            Target::Process(pid) => {
                // safety: param is writable
                check_errno(unsafe { libc::sched_getparam(pid, &mut param) })?;
                // safety: sched_getscheduler has no memory preconditions
                check_errno(unsafe { libc::sched_getscheduler(pid) })?
            }
            Target::Thread(thread) => {
                let mut policy = 0;
                // safety: policy and param are writable
                check_pthread(unsafe {
                    libc::pthread_getschedparam(thread.as_raw(), &mut policy, &mut param)
                })?;
                policy
            }
        };
        rt_priority(policy, &param)
    }

    fn read_attribute(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn write_attribute(&self, path: &Path, value: &str) -> io::Result<()> {
        // sysfs and procfs attributes can neither be created nor truncated
        let mut file = OpenOptions::new().write(true).open(path)?;
        file.write_all(value.as_bytes())
    }

    fn stack_remaining(&self) -> Result<usize, RtError> {
        // safety: pthread_attr_t is a POD type, pthread_getattr_np fills it in
        let mut attr: libc::pthread_attr_t = unsafe { std::mem::zeroed() };
        // safety: attr is writable, it is destroyed below
        check_pthread(unsafe { libc::pthread_getattr_np(libc::pthread_self(), &mut attr) })?;
        let mut stack_addr: *mut libc::c_void = std::ptr::null_mut();
        let mut stack_size: libc::size_t = 0;
        // safety: attr was initialized by pthread_getattr_np
        let ret = unsafe { libc::pthread_attr_getstack(&attr, &mut stack_addr, &mut stack_size) };
        // safety: attr was initialized by pthread_getattr_np and is not used afterwards
        unsafe { libc::pthread_attr_destroy(&mut attr) };
        check_pthread(ret)?;

        // the stack grows down from `stack_addr + stack_size` towards `stack_addr`
        let marker = 0u8;
        let here = std::hint::black_box(&marker) as *const u8 as usize;
        Ok(here.saturating_sub(stack_addr as usize).min(stack_size))
    }

    fn lock_all_memory(&self) -> Result<(), RtError> {
        // safety: mlockall has no memory preconditions
        check_errno(unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) })?;
        Ok(())
    }

    fn unlock_all_memory(&self) -> Result<(), RtError> {
        // safety: munlockall has no memory preconditions
        check_errno(unsafe { libc::munlockall() })?;
        Ok(())
    }

    fn monotonic_now(&self) -> Result<Duration, RtError> {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // safety: ts is writable
        check_errno(unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) })?;
        Ok(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
    }

    fn sleep_until(&self, deadline: Duration) -> Result<(), RtError> {
        let ts = libc::timespec {
            tv_sec: deadline.as_secs() as libc::time_t,
            tv_nsec: deadline.subsec_nanos() as libc::c_long,
        };
        loop {
            // safety: ts is a valid absolute timespec, the remainder is unused with TIMER_ABSTIME
            let ret = unsafe {
                libc::clock_nanosleep(
                    libc::CLOCK_MONOTONIC,
                    libc::TIMER_ABSTIME,
                    &ts,
                    std::ptr::null_mut(),
                )
            };
            match ret {
                0 => return Ok(()),
                // a signal woke us up early, the deadline is absolute so just go back to sleep
                libc::EINTR => continue,
                errno => return Err(RtError::Io(io::Error::from_raw_os_error(errno))),
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
impl RtPlatform for SystemPlatform {
    fn online_cpu_count(&self) -> Result<usize, RtError> {
        Err(RtError::NotSupported)
    }

    fn current_cpu(&self) -> Result<usize, RtError> {
        Err(RtError::NotSupported)
    }

    fn set_affinity(&self, _target: Target, _mask: &CpuMask) -> Result<(), RtError> {
        Err(RtError::NotSupported)
    }

    fn affinity(&self, _target: Target) -> Result<CpuMask, RtError> {
        Err(RtError::NotSupported)
    }

    fn current_thread(&self) -> ThreadHandle {
        // safety: pthread_self always succeeds
        ThreadHandle::from_raw(unsafe { libc::pthread_self() })
    }

    fn current_tid(&self) -> Pid {
        0
    }

    fn set_nice(&self, _who: Pid, _nice: i32) -> Result<(), RtError> {
        Err(RtError::NotSupported)
    }

    fn nice(&self, _who: Pid) -> Result<i32, RtError> {
        Err(RtError::NotSupported)
    }

    fn set_scheduler(&self, _target: Target, _priority: &RtPriority) -> Result<(), RtError> {
        Err(RtError::NotSupported)
    }

    fn scheduler(&self, _target: Target) -> Result<RtPriority, RtError> {
        Err(RtError::NotSupported)
    }

    fn read_attribute(&self, _path: &Path) -> io::Result<String> {
        Err(io::ErrorKind::Unsupported.into())
    }

    fn write_attribute(&self, _path: &Path, _value: &str) -> io::Result<()> {
        Err(io::ErrorKind::Unsupported.into())
    }

    fn stack_remaining(&self) -> Result<usize, RtError> {
        Err(RtError::NotSupported)
    }

    fn lock_all_memory(&self) -> Result<(), RtError> {
        Err(RtError::NotSupported)
    }

    fn unlock_all_memory(&self) -> Result<(), RtError> {
        Err(RtError::NotSupported)
    }

    fn monotonic_now(&self) -> Result<Duration, RtError> {
        Err(RtError::NotSupported)
    }

    fn sleep_until(&self, _deadline: Duration) -> Result<(), RtError> {
        Err(RtError::NotSupported)
    }
}
