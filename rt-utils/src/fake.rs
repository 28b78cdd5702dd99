//! An in-memory [`RtPlatform`] for tests.
//!
//! `FakePlatform` models the parts of kernel behavior the crate relies on: affinity masks
//! are restricted to online CPUs, raising a real-time policy or lowering niceness requires
//! privileges, and sysfs attributes can be read and overwritten but never created.

use {
    crate::{
        affinity::CpuMask,
        error::RtError,
        platform::{Pid, RtPlatform, Target, ThreadHandle},
        priority::{RtPriority, SchedPolicy},
    },
    std::{
        collections::{HashMap, HashSet},
        io,
        path::{Path, PathBuf},
        sync::{Mutex, MutexGuard},
        time::Duration,
    },
};

/// Pid of the process owning the fake platform; `0` resolves to it.
pub const FAKE_PID: Pid = 4242;
/// Kernel task id of the calling thread.
pub const FAKE_TID: Pid = 4243;

pub const DEFAULT_GOVERNOR: &str = "powersave";
pub const AVAILABLE_GOVERNORS: &str =
    "conservative ondemand userspace powersave performance schedutil";

#[derive(Debug)]
struct FakeState {
    online_cpu_count: usize,
    current_cpu: usize,
    current_thread: ThreadHandle,
    privileged: bool,
    affinities: HashMap<Target, CpuMask>,
    nice: HashMap<Pid, i32>,
    schedulers: HashMap<Target, RtPriority>,
    attributes: HashMap<PathBuf, String>,
    denied_writes: HashSet<PathBuf>,
    attribute_writes: Vec<(PathBuf, String)>,
    stack_remaining: usize,
    memory_locked: bool,
    clock: Duration,
    sleeps: usize,
}

#[derive(Debug)]
pub struct FakePlatform {
    state: Mutex<FakeState>,
}

fn os_error(errno: i32) -> RtError {
    RtError::Io(io::Error::from_raw_os_error(errno))
}

fn resolve(target: Target) -> Target {
    match target {
        Target::Process(0) => Target::Process(FAKE_PID),
        target => target,
    }
}

impl FakePlatform {
    /// A privileged process on a machine with `cpus` online CPUs, each with a cpufreq
    /// governor attribute set to [`DEFAULT_GOVERNOR`].
    pub fn new(cpus: usize) -> Self {
        let mut attributes = HashMap::new();
        let last = cpus.saturating_sub(1);
        attributes.insert(
            PathBuf::from("/sys/devices/system/cpu/online"),
            format!("0-{last}\n"),
        );
        for cpu in 0..cpus {
            let cpufreq = PathBuf::from(format!("/sys/devices/system/cpu/cpu{cpu}/cpufreq"));
            attributes.insert(
                cpufreq.join("scaling_governor"),
                format!("{DEFAULT_GOVERNOR}\n"),
            );
            attributes.insert(
                cpufreq.join("scaling_available_governors"),
                format!("{AVAILABLE_GOVERNORS}\n"),
            );
        }
        attributes.insert(
            PathBuf::from("/proc/sys/kernel/sched_rt_period_us"),
            "1000000\n".to_string(),
        );
        attributes.insert(
            PathBuf::from("/proc/sys/kernel/sched_rt_runtime_us"),
            "950000\n".to_string(),
        );

        Self {
            state: Mutex::new(FakeState {
                online_cpu_count: cpus,
                current_cpu: 0,
                current_thread: ThreadHandle::from_raw(FAKE_TID as libc::pthread_t),
                privileged: true,
                affinities: HashMap::new(),
                nice: HashMap::new(),
                schedulers: HashMap::new(),
                attributes,
                denied_writes: HashSet::new(),
                attribute_writes: Vec::new(),
                stack_remaining: 8 * 1024 * 1024,
                memory_locked: false,
                clock: Duration::from_secs(1),
                sleeps: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        // a panicking test must not poison the other assertions of the same test
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_privileged(&self, privileged: bool) {
        self.state().privileged = privileged;
    }

    pub fn set_current_cpu(&self, cpu: usize) {
        self.state().current_cpu = cpu;
    }

    /// Bytes of stack the calling thread has left.
    pub fn set_stack_remaining(&self, remaining: usize) {
        self.state().stack_remaining = remaining;
    }

    pub fn set_attribute(&self, path: impl AsRef<Path>, value: &str) {
        self.state()
            .attributes
            .insert(path.as_ref().to_path_buf(), value.to_string());
    }

    pub fn remove_attribute(&self, path: impl AsRef<Path>) {
        self.state().attributes.remove(path.as_ref());
    }

    pub fn attribute(&self, path: impl AsRef<Path>) -> Option<String> {
        self.state().attributes.get(path.as_ref()).cloned()
    }

    /// Makes writes to `path` fail with `EACCES`.
    pub fn deny_writes(&self, path: impl AsRef<Path>) {
        self.state()
            .denied_writes
            .insert(path.as_ref().to_path_buf());
    }

    /// Every successful attribute write, in order.
    pub fn attribute_writes(&self) -> Vec<(PathBuf, String)> {
        self.state().attribute_writes.clone()
    }

    pub fn memory_locked(&self) -> bool {
        self.state().memory_locked
    }

    pub fn advance_clock(&self, by: Duration) {
        self.state().clock += by;
    }

    pub fn sleeps(&self) -> usize {
        self.state().sleeps
    }
}

impl RtPlatform for FakePlatform {
    fn online_cpu_count(&self) -> Result<usize, RtError> {
        Ok(self.state().online_cpu_count)
    }

    fn current_cpu(&self) -> Result<usize, RtError> {
        Ok(self.state().current_cpu)
    }

    fn set_affinity(&self, target: Target, mask: &CpuMask) -> Result<(), RtError> {
        let mut state = self.state();
        let online = state.online_cpu_count;
        if !mask.iter().any(|cpu| cpu < online) {
            return Err(os_error(libc::EINVAL));
        }
        state.affinities.insert(resolve(target), *mask);
        Ok(())
    }

    fn affinity(&self, target: Target) -> Result<CpuMask, RtError> {
        let state = self.state();
        Ok(state
            .affinities
            .get(&resolve(target))
            .copied()
            .unwrap_or_else(|| (0..state.online_cpu_count).collect()))
    }

    fn current_thread(&self) -> ThreadHandle {
        self.state().current_thread
    }

    fn current_tid(&self) -> Pid {
        FAKE_TID
    }

    fn set_nice(&self, who: Pid, nice: i32) -> Result<(), RtError> {
        let mut state = self.state();
        let who = if who == 0 { FAKE_PID } else { who };
        let current = state.nice.get(&who).copied().unwrap_or_default();
        if !state.privileged && nice < current {
            return Err(os_error(libc::EACCES));
        }
        state.nice.insert(who, nice);
        Ok(())
    }

    fn nice(&self, who: Pid) -> Result<i32, RtError> {
        let who = if who == 0 { FAKE_PID } else { who };
        Ok(self.state().nice.get(&who).copied().unwrap_or_default())
    }

    fn set_scheduler(&self, target: Target, priority: &RtPriority) -> Result<(), RtError> {
        let mut state = self.state();
        let valid = if priority.policy.is_real_time() {
            (1..=99).contains(&priority.priority)
        } else {
            priority.priority == 0
        };
        if !valid {
            return Err(os_error(libc::EINVAL));
        }
        if priority.policy.is_real_time() && !state.privileged {
            return Err(os_error(libc::EPERM));
        }
        state.schedulers.insert(resolve(target), *priority);
        Ok(())
    }

    fn scheduler(&self, target: Target) -> Result<RtPriority, RtError> {
        Ok(self
            .state()
            .schedulers
            .get(&resolve(target))
            .copied()
            .unwrap_or(RtPriority::new(SchedPolicy::Other, 0)))
    }

    fn read_attribute(&self, path: &Path) -> io::Result<String> {
        self.state()
            .attributes
            .get(path)
            .cloned()
            .ok_or_else(|| io::ErrorKind::NotFound.into())
    }

    fn write_attribute(&self, path: &Path, value: &str) -> io::Result<()> {
        let mut state = self.state();
        if state.denied_writes.contains(path) {
            return Err(io::Error::from_raw_os_error(libc::EACCES));
        }
        let Some(attribute) = state.attributes.get_mut(path) else {
            return Err(io::ErrorKind::NotFound.into());
        };
        *attribute = format!("{value}\n");
        state
            .attribute_writes
            .push((path.to_path_buf(), value.to_string()));
        Ok(())
    }

    fn stack_remaining(&self) -> Result<usize, RtError> {
        Ok(self.state().stack_remaining)
    }

    fn lock_all_memory(&self) -> Result<(), RtError> {
        let mut state = self.state();
        if !state.privileged {
            return Err(os_error(libc::EPERM));
        }
        state.memory_locked = true;
        Ok(())
    }

    fn unlock_all_memory(&self) -> Result<(), RtError> {
        self.state().memory_locked = false;
        Ok(())
    }

    fn monotonic_now(&self) -> Result<Duration, RtError> {
        Ok(self.state().clock)
    }

    fn sleep_until(&self, deadline: Duration) -> Result<(), RtError> {
        let mut state = self.state();
        state.sleeps += 1;
        state.clock = state.clock.max(deadline);
        Ok(())
    }
}
