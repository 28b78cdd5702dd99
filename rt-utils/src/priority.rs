//! Time-sharing ("nice") and real-time scheduling priority.

use {
    crate::{
        control::RtControl,
        error::RtError,
        platform::{Pid, RtPlatform, Target, ThreadHandle},
    },
    log::debug,
    serde::{Deserialize, Serialize},
    std::ops::RangeInclusive,
};

/// Accepted niceness values, lower is higher priority.
pub const NICE_RANGE: RangeInclusive<i32> = -20..=19;

/// Kernel scheduling policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedPolicy {
    /// `SCHED_OTHER`, the default time-sharing policy
    Other,
    /// `SCHED_FIFO`
    Fifo,
    /// `SCHED_RR`
    RoundRobin,
    /// `SCHED_BATCH`
    Batch,
    /// `SCHED_IDLE`
    Idle,
}

impl SchedPolicy {
    /// Whether the policy is one of the real-time policies, which take a 1..=99 priority.
    pub fn is_real_time(&self) -> bool {
        matches!(self, Self::Fifo | Self::RoundRobin)
    }

    #[cfg(target_os = "linux")]
    pub fn as_raw(&self) -> libc::c_int {
        match self {
            Self::Other => libc::SCHED_OTHER,
            Self::Fifo => libc::SCHED_FIFO,
            Self::RoundRobin => libc::SCHED_RR,
            Self::Batch => libc::SCHED_BATCH,
            Self::Idle => libc::SCHED_IDLE,
        }
    }

    #[cfg(target_os = "linux")]
    pub fn from_raw(raw: libc::c_int) -> Option<Self> {
        match raw {
            libc::SCHED_OTHER => Some(Self::Other),
            libc::SCHED_FIFO => Some(Self::Fifo),
            libc::SCHED_RR => Some(Self::RoundRobin),
            libc::SCHED_BATCH => Some(Self::Batch),
            libc::SCHED_IDLE => Some(Self::Idle),
            _ => None,
        }
    }
}

/// Scheduling policy and static priority, read and written as one unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RtPriority {
    pub policy: SchedPolicy,
    pub priority: u32,
}

impl RtPriority {
    pub const fn new(policy: SchedPolicy, priority: u32) -> Self {
        Self { policy, priority }
    }
}

fn check_nice(nice: i32) -> Result<(), RtError> {
    if !NICE_RANGE.contains(&nice) {
        return Err(RtError::InvalidNice(nice));
    }
    Ok(())
}

impl<P: RtPlatform> RtControl<P> {
    /// Set the niceness of a process (`0` for the calling process).
    ///
    /// # Errors
    ///
    /// Returns [`RtError::InvalidNice`] if `nice` is outside of [`NICE_RANGE`], without
    /// touching the process.
    /// Returns [`RtError::Io`] if the system call fails, e.g. `EACCES` when lowering the
    /// niceness without `CAP_SYS_NICE`.
    pub fn set_process_priority(&self, pid: Pid, nice: i32) -> Result<(), RtError> {
        check_nice(nice)?;
        debug!("setting niceness of process {pid} to {nice}");
        self.platform().set_nice(pid, nice)
    }

    /// Niceness of a process (`0` for the calling process).
    pub fn process_priority(&self, pid: Pid) -> Result<i32, RtError> {
        self.platform().nice(pid)
    }

    /// Set the niceness of a thread.
    ///
    /// Linux keeps the niceness per kernel task, and the task of a thread can only be
    /// resolved from within that thread. `thread` must therefore be the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::ForeignThread`] if `thread` is not the calling thread.
    /// Otherwise as [`RtControl::set_process_priority`].
    pub fn set_thread_priority(&self, thread: ThreadHandle, nice: i32) -> Result<(), RtError> {
        check_nice(nice)?;
        let tid = self.calling_task(thread)?;
        debug!("setting niceness of task {tid} to {nice}");
        self.platform().set_nice(tid, nice)
    }

    /// Niceness of a thread, which must be the calling thread.
    pub fn thread_priority(&self, thread: ThreadHandle) -> Result<i32, RtError> {
        let tid = self.calling_task(thread)?;
        self.platform().nice(tid)
    }

    fn calling_task(&self, thread: ThreadHandle) -> Result<Pid, RtError> {
        if thread != self.platform().current_thread() {
            return Err(RtError::ForeignThread);
        }
        Ok(self.platform().current_tid())
    }

    /// Set the scheduling policy and priority of a process (`0` for the calling process).
    ///
    /// # Errors
    ///
    /// Returns [`RtError::Io`] with the scheduler's own error, e.g. `EPERM` when requesting
    /// a real-time policy without privileges or `EINVAL` for a priority the policy does not
    /// accept.
    pub fn set_process_rt_priority(&self, pid: Pid, priority: &RtPriority) -> Result<(), RtError> {
        debug!("setting scheduler of process {pid} to {priority:?}");
        self.platform().set_scheduler(Target::Process(pid), priority)
    }

    /// Scheduling policy and priority of a process.
    pub fn process_rt_priority(&self, pid: Pid) -> Result<RtPriority, RtError> {
        self.platform().scheduler(Target::Process(pid))
    }

    /// Set the scheduling policy and priority of a thread.
    pub fn set_thread_rt_priority(
        &self,
        thread: ThreadHandle,
        priority: &RtPriority,
    ) -> Result<(), RtError> {
        debug!("setting scheduler of thread {thread:?} to {priority:?}");
        self.platform().set_scheduler(Target::Thread(thread), priority)
    }

    /// Scheduling policy and priority of a thread.
    pub fn thread_rt_priority(&self, thread: ThreadHandle) -> Result<RtPriority, RtError> {
        self.platform().scheduler(Target::Thread(thread))
    }

    /// Handle of the calling thread.
    pub fn current_thread(&self) -> ThreadHandle {
        self.platform().current_thread()
    }
}

/// Handle of the calling thread.
pub fn current_thread() -> ThreadHandle {
    RtControl::system().current_thread()
}

/// Set the niceness of a process. See [`RtControl::set_process_priority`].
pub fn set_process_priority(pid: Pid, nice: i32) -> Result<(), RtError> {
    RtControl::system().set_process_priority(pid, nice)
}

/// Niceness of a process. See [`RtControl::process_priority`].
pub fn process_priority(pid: Pid) -> Result<i32, RtError> {
    RtControl::system().process_priority(pid)
}

/// Set the niceness of the calling thread. See [`RtControl::set_thread_priority`].
///
/// # Examples
///
/// ```no_run
/// # use agave_rt_utils::*;
/// # fn main() -> Result<(), RtError> {
/// std::thread::spawn(|| set_thread_priority(current_thread(), 5))
///     .join()
///     .unwrap()?;
/// # Ok(())
/// # }
/// ```
pub fn set_thread_priority(thread: ThreadHandle, nice: i32) -> Result<(), RtError> {
    RtControl::system().set_thread_priority(thread, nice)
}

/// Niceness of the calling thread. See [`RtControl::thread_priority`].
pub fn thread_priority(thread: ThreadHandle) -> Result<i32, RtError> {
    RtControl::system().thread_priority(thread)
}

/// Set the scheduling policy and priority of a process.
///
/// # Examples
///
/// ```no_run
/// # use agave_rt_utils::*;
/// # fn main() -> Result<(), RtError> {
/// set_process_rt_priority(0, &RtPriority::new(SchedPolicy::Fifo, 50))?;
/// # Ok(())
/// # }
/// ```
pub fn set_process_rt_priority(pid: Pid, priority: &RtPriority) -> Result<(), RtError> {
    RtControl::system().set_process_rt_priority(pid, priority)
}

/// Scheduling policy and priority of a process.
pub fn process_rt_priority(pid: Pid) -> Result<RtPriority, RtError> {
    RtControl::system().process_rt_priority(pid)
}

/// Set the scheduling policy and priority of a thread.
pub fn set_thread_rt_priority(thread: ThreadHandle, priority: &RtPriority) -> Result<(), RtError> {
    RtControl::system().set_thread_rt_priority(thread, priority)
}

/// Scheduling policy and priority of a thread.
pub fn thread_rt_priority(thread: ThreadHandle) -> Result<RtPriority, RtError> {
    RtControl::system().thread_rt_priority(thread)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::fake::{FakePlatform, FAKE_PID, FAKE_TID},
        assert_matches::assert_matches,
        test_case::test_case,
    };

    #[test_case(-20)]
    #[test_case(-1)]
    #[test_case(0)]
    #[test_case(19)]
    fn test_process_priority_round_trip(nice: i32) {
        let control = RtControl::new(FakePlatform::new(1));
        control.set_process_priority(0, nice).unwrap();
        assert_eq!(control.process_priority(0).unwrap(), nice);
        assert_eq!(control.process_priority(FAKE_PID).unwrap(), nice);
    }

    #[test_case(-21)]
    #[test_case(20)]
    #[test_case(i32::MIN)]
    fn test_out_of_range_nice_is_rejected(nice: i32) {
        let control = RtControl::new(FakePlatform::new(1));
        control.set_process_priority(0, 7).unwrap();

        assert_matches!(
            control.set_process_priority(0, nice),
            Err(RtError::InvalidNice(n)) if n == nice
        );
        let thread = control.current_thread();
        assert_matches!(
            control.set_thread_priority(thread, nice),
            Err(RtError::InvalidNice(_))
        );
        assert_eq!(control.process_priority(0).unwrap(), 7);
    }

    #[test]
    fn test_unprivileged_nice_decrease_fails() {
        let control = RtControl::new(FakePlatform::new(1));
        control.platform().set_privileged(false);
        control.set_process_priority(0, 10).unwrap();
        let err = control.set_process_priority(0, 5).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EACCES));
        assert_eq!(control.process_priority(0).unwrap(), 10);
    }

    #[test]
    fn test_thread_priority_targets_calling_task() {
        let control = RtControl::new(FakePlatform::new(1));
        let thread = control.current_thread();
        control.set_thread_priority(thread, 3).unwrap();
        assert_eq!(control.thread_priority(thread).unwrap(), 3);
        assert_eq!(control.process_priority(FAKE_TID).unwrap(), 3);
        assert_eq!(control.process_priority(0).unwrap(), 0);
    }

    #[test]
    fn test_thread_priority_rejects_other_threads() {
        let control = RtControl::new(FakePlatform::new(1));
        let other = ThreadHandle::from_raw(1 as libc::pthread_t);
        assert_matches!(
            control.set_thread_priority(other, 3),
            Err(RtError::ForeignThread)
        );
        assert_matches!(control.thread_priority(other), Err(RtError::ForeignThread));
        assert_eq!(control.process_priority(FAKE_TID).unwrap(), 0);
    }

    #[test]
    fn test_rt_priority_round_trip() {
        let control = RtControl::new(FakePlatform::new(1));
        assert_eq!(
            control.process_rt_priority(0).unwrap(),
            RtPriority::new(SchedPolicy::Other, 0)
        );

        let fifo = RtPriority::new(SchedPolicy::Fifo, 50);
        control.set_process_rt_priority(0, &fifo).unwrap();
        assert_eq!(control.process_rt_priority(0).unwrap(), fifo);

        let thread = control.current_thread();
        let rr = RtPriority::new(SchedPolicy::RoundRobin, 80);
        control.set_thread_rt_priority(thread, &rr).unwrap();
        assert_eq!(control.thread_rt_priority(thread).unwrap(), rr);
        assert_eq!(control.process_rt_priority(0).unwrap(), fifo);
    }

    #[test]
    fn test_unprivileged_rt_priority_leaves_policy_unchanged() {
        let control = RtControl::new(FakePlatform::new(1));
        control.platform().set_privileged(false);
        let err = control
            .set_process_rt_priority(0, &RtPriority::new(SchedPolicy::Fifo, 50))
            .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EPERM));
        assert_eq!(
            control.process_rt_priority(0).unwrap(),
            RtPriority::new(SchedPolicy::Other, 0)
        );
    }

    #[test]
    fn test_invalid_policy_priority_combination() {
        let control = RtControl::new(FakePlatform::new(1));
        for priority in [
            RtPriority::new(SchedPolicy::Fifo, 0),
            RtPriority::new(SchedPolicy::RoundRobin, 100),
            RtPriority::new(SchedPolicy::Other, 10),
        ] {
            let err = control.set_process_rt_priority(0, &priority).unwrap_err();
            assert_eq!(err.raw_os_error(), Some(libc::EINVAL), "{priority:?}");
        }
    }

    #[test]
    fn test_policy_serde_names() {
        let priority: RtPriority =
            serde_json::from_str(r#"{"policy":"round_robin","priority":10}"#).unwrap();
        assert_eq!(priority, RtPriority::new(SchedPolicy::RoundRobin, 10));
        assert_eq!(
            serde_json::to_string(&SchedPolicy::Fifo).unwrap(),
            r#""fifo""#
        );
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_policy_raw_round_trip() {
        for policy in [
            SchedPolicy::Other,
            SchedPolicy::Fifo,
            SchedPolicy::RoundRobin,
            SchedPolicy::Batch,
            SchedPolicy::Idle,
        ] {
            assert_eq!(SchedPolicy::from_raw(policy.as_raw()), Some(policy));
        }
        assert_eq!(SchedPolicy::from_raw(6), None);
    }
}
