//! RT throttling: the share of CPU time the kernel keeps away from real-time tasks.
//!
//! By default the kernel lets real-time tasks run for `sched_rt_runtime_us` out of every
//! `sched_rt_period_us` microseconds, so that a runaway real-time task cannot starve the
//! rest of the system. A runtime of `-1` disables the limit.

use {
    crate::{control::RtControl, error::RtError, platform::RtPlatform},
    log::debug,
    std::path::Path,
};

pub const RT_RUNTIME_PATH: &str = "/proc/sys/kernel/sched_rt_runtime_us";
pub const RT_PERIOD_PATH: &str = "/proc/sys/kernel/sched_rt_period_us";

const UNLIMITED_RUNTIME: &str = "-1";

/// Current RT throttling settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RtThrottling {
    pub period_us: u64,
    /// `None` when throttling is disabled
    pub runtime_us: Option<u64>,
}

impl RtThrottling {
    pub fn is_disabled(&self) -> bool {
        self.runtime_us.is_none()
    }
}

impl<P: RtPlatform> RtControl<P> {
    /// Let real-time tasks use all of the CPU time.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::Io`] if the procfs file cannot be opened (usually `EACCES` when not
    /// root) or the write is rejected.
    pub fn disable_rt_throttling(&self) -> Result<(), RtError> {
        self.set_rt_runtime(None)
    }

    /// Set the RT runtime per period, `None` to disable throttling.
    pub fn set_rt_runtime(&self, runtime_us: Option<u64>) -> Result<(), RtError> {
        let value = runtime_us.map_or_else(|| UNLIMITED_RUNTIME.to_string(), |us| us.to_string());
        debug!("writing {value} to {RT_RUNTIME_PATH}");
        self.platform()
            .write_attribute(Path::new(RT_RUNTIME_PATH), &value)?;
        Ok(())
    }

    /// Read the current RT throttling settings.
    pub fn rt_throttling(&self) -> Result<RtThrottling, RtError> {
        let period_us = self
            .platform()
            .read_attribute(Path::new(RT_PERIOD_PATH))?
            .trim()
            .parse::<u64>()
            .map_err(|err| RtError::ParseError(format!("{RT_PERIOD_PATH}: {err}")))?;
        let runtime = self.platform().read_attribute(Path::new(RT_RUNTIME_PATH))?;
        let runtime_us = match runtime.trim() {
            UNLIMITED_RUNTIME => None,
            runtime => Some(
                runtime
                    .parse::<u64>()
                    .map_err(|err| RtError::ParseError(format!("{RT_RUNTIME_PATH}: {err}")))?,
            ),
        };
        Ok(RtThrottling {
            period_us,
            runtime_us,
        })
    }
}

/// Disable RT throttling. See [`RtControl::disable_rt_throttling`].
pub fn disable_rt_throttling() -> Result<(), RtError> {
    RtControl::system().disable_rt_throttling()
}

/// Set the RT runtime per period. See [`RtControl::set_rt_runtime`].
pub fn set_rt_runtime(runtime_us: Option<u64>) -> Result<(), RtError> {
    RtControl::system().set_rt_runtime(runtime_us)
}

/// Read the RT throttling settings. See [`RtControl::rt_throttling`].
pub fn rt_throttling() -> Result<RtThrottling, RtError> {
    RtControl::system().rt_throttling()
}
