//! Periodic execution on absolute monotonic deadlines.

use {
    crate::{control::RtControl, error::RtError, platform::RtPlatform},
    log::debug,
    std::{ops::ControlFlow, time::Duration},
};

/// Timing statistics of a [`RtControl::run_periodic`] loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeriodicStats {
    /// Number of times the task ran
    pub iterations: u64,
    /// Runs that finished after the next deadline
    pub overruns: u64,
    /// Largest delay between a deadline and the wake-up for it
    pub max_lateness: Duration,
}

impl<P: RtPlatform> RtControl<P> {
    /// Run `task` on the calling thread once per `period` until it returns
    /// [`ControlFlow::Break`].
    ///
    /// Deadlines are absolute (`CLOCK_MONOTONIC`, `TIMER_ABSTIME`), so the time spent in the
    /// task does not shift later activations. A run that ends after the next deadline counts
    /// as an overrun and the next activation happens immediately.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::InvalidPeriod`] for a zero period.
    /// Returns [`RtError::Io`] if the clock cannot be read or the sleep fails.
    pub fn run_periodic<F>(&self, period: Duration, mut task: F) -> Result<PeriodicStats, RtError>
    where
        F: FnMut() -> ControlFlow<()>,
    {
        if period.is_zero() {
            return Err(RtError::InvalidPeriod);
        }

        let mut stats = PeriodicStats::default();
        let mut deadline = self.platform().monotonic_now()? + period;
        loop {
            self.platform().sleep_until(deadline)?;
            let woke = self.platform().monotonic_now()?;
            stats.max_lateness = stats.max_lateness.max(woke.saturating_sub(deadline));

            stats.iterations += 1;
            let flow = task();

            deadline += period;
            if self.platform().monotonic_now()? > deadline {
                stats.overruns += 1;
            }
            if flow.is_break() {
                debug!("periodic task stopped: {stats:?}");
                return Ok(stats);
            }
        }
    }
}

/// Run `task` once per `period` on the calling thread. See [`RtControl::run_periodic`].
///
/// # Examples
///
/// ```no_run
/// # use {agave_rt_utils::*, std::{ops::ControlFlow, time::Duration}};
/// # fn main() -> Result<(), RtError> {
/// let mut remaining = 5;
/// let stats = run_periodic(Duration::from_millis(1), || {
///     remaining -= 1;
///     if remaining == 0 {
///         ControlFlow::Break(())
///     } else {
///         ControlFlow::Continue(())
///     }
/// })?;
/// assert_eq!(stats.iterations, 5);
/// # Ok(())
/// # }
/// ```
pub fn run_periodic<F>(period: Duration, task: F) -> Result<PeriodicStats, RtError>
where
    F: FnMut() -> ControlFlow<()>,
{
    RtControl::system().run_periodic(period, task)
}
