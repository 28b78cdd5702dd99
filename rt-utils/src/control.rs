//! Entry point tying the operations of this crate to a platform.

use crate::{platform::RtPlatform, system::SystemPlatform};

/// Real-time control operations against a [`RtPlatform`].
///
/// The operations themselves are implemented in the `affinity`, `priority`, `governor`,
/// `memlock`, `throttling`, `periodic` and `config` modules. Each one is independent: the
/// control holds no state besides the platform.
///
/// ```no_run
/// # use agave_rt_utils::*;
/// # fn main() -> Result<(), RtError> {
/// let control = RtControl::system();
/// control.set_process_affinity(0, [0, 1])?;
/// println!("governor of CPU 0: {:?}", control.governor(0));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct RtControl<P: RtPlatform = SystemPlatform> {
    platform: P,
}

impl RtControl<SystemPlatform> {
    /// Control over the running kernel.
    pub fn system() -> Self {
        Self::new(SystemPlatform)
    }
}

impl<P: RtPlatform> RtControl<P> {
    pub fn new(platform: P) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }
}
