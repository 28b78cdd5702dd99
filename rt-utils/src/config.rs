//! Declarative real-time setup of the calling thread.

use {
    crate::{
        control::RtControl,
        error::RtError,
        governor::Governor,
        platform::RtPlatform,
        priority::RtPriority,
    },
    log::info,
    serde::{Deserialize, Serialize},
    std::{fs::File, io::Read, path::Path},
};

/// Settings applied by [`RtControl::apply_config`]. Absent fields are left untouched.
///
/// ```
/// # use agave_rt_utils::*;
/// let config: RtConfig = serde_json::from_str(
///     r#"{
///         "governor": "performance",
///         "cpu_affinity": [2, 3],
///         "rt_priority": { "policy": "fifo", "priority": 50 }
///     }"#,
/// )
/// .unwrap();
/// assert_eq!(config.governor, Some(Governor::Performance));
/// assert!(!config.disable_rt_throttling);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtConfig {
    /// Governor for every online CPU
    pub governor: Option<Governor>,
    pub disable_rt_throttling: bool,
    /// CPUs the calling thread may run on, empty to keep the current mask
    pub cpu_affinity: Vec<usize>,
    /// Niceness of the calling thread
    pub nice: Option<i32>,
    /// Scheduling policy and priority of the calling thread
    pub rt_priority: Option<RtPriority>,
    /// Lock memory after committing this many bytes of stack
    pub lock_memory_stack_bytes: Option<usize>,
}

impl RtConfig {
    pub fn from_reader(reader: impl Read) -> Result<Self, RtError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RtError> {
        Self::from_reader(File::open(path)?)
    }
}

impl<P: RtPlatform> RtControl<P> {
    /// Apply `config` to the calling thread and the system.
    ///
    /// Settings are applied in order: governor, RT throttling, affinity, niceness, RT
    /// priority, memory lock. The first failure is returned and the remaining settings are
    /// not applied; the ones already applied stay in effect.
    pub fn apply_config(&self, config: &RtConfig) -> Result<(), RtError> {
        let thread = self.current_thread();

        if let Some(governor) = config.governor {
            info!("setting governor {governor} on all online CPUs");
            self.set_governor_all(governor)?;
        }
        if config.disable_rt_throttling {
            info!("disabling RT throttling");
            self.disable_rt_throttling()?;
        }
        if !config.cpu_affinity.is_empty() {
            info!("pinning thread to CPUs {:?}", config.cpu_affinity);
            self.set_thread_affinity(
                thread,
                config
                    .cpu_affinity
                    .iter()
                    .filter_map(|&cpu| i32::try_from(cpu).ok()),
            )?;
        }
        if let Some(nice) = config.nice {
            info!("setting thread niceness to {nice}");
            self.set_thread_priority(thread, nice)?;
        }
        if let Some(priority) = &config.rt_priority {
            info!(
                "setting thread scheduling policy {:?} priority {}",
                priority.policy, priority.priority
            );
            self.set_thread_rt_priority(thread, priority)?;
        }
        if let Some(stack_size) = config.lock_memory_stack_bytes {
            info!("locking memory with {stack_size} bytes of stack");
            self.lock_and_reserve(stack_size)?;
        }
        Ok(())
    }
}
