//! Memory locking, to keep page faults out of time-critical code.

use {
    crate::{control::RtControl, error::RtError, platform::RtPlatform},
    log::debug,
    std::hint::black_box,
};

const PREFAULT_CHUNK: usize = 4096;
/// Stack kept free below the pre-faulted region for the calls made after it.
const STACK_HEADROOM: usize = 64 * 1024;

/// Stack consumed by pre-faulting `size` bytes: the chunks plus the frame bookkeeping of
/// each recursion level.
fn prefault_cost(size: usize) -> usize {
    size.saturating_add(size / 8).saturating_add(STACK_HEADROOM)
}

/// Touches `size` bytes of the calling thread's stack so that its pages are committed.
#[inline(never)]
fn prefault_stack(size: usize) {
    let mut chunk = [0u8; PREFAULT_CHUNK];
    black_box(&mut chunk);
    if size > PREFAULT_CHUNK {
        prefault_stack(size - PREFAULT_CHUNK);
    }
    // keeps the frame alive across the recursive call so it is not turned into a loop
    black_box(&chunk);
}

impl<P: RtPlatform> RtControl<P> {
    /// Commit `stack_size` bytes of the calling thread's stack, then lock all current and
    /// future pages of the process into memory.
    ///
    /// Typically called once at start-up, from the thread that will run the time-critical
    /// work, so that neither its stack nor later allocations take page faults.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::StackTooLarge`] if `stack_size` does not fit in what is left of the
    /// calling thread's stack. This accounts for the thread's own stack size, which for
    /// spawned threads is usually well below `RLIMIT_STACK`, and for the frames already in use.
    /// Returns [`RtError::Io`] if locking fails, e.g. `EPERM` without `CAP_IPC_LOCK` or
    /// `ENOMEM` beyond `RLIMIT_MEMLOCK`.
    pub fn lock_and_reserve(&self, stack_size: usize) -> Result<(), RtError> {
        let available = self.platform().stack_remaining()?;
        if prefault_cost(stack_size) > available {
            return Err(RtError::StackTooLarge {
                requested: stack_size,
                available,
            });
        }
        debug!("pre-faulting {stack_size} bytes of stack and locking memory");
        prefault_stack(stack_size);
        self.platform().lock_all_memory()
    }

    /// Unlock all pages of the process.
    pub fn unlock_memory(&self) -> Result<(), RtError> {
        self.platform().unlock_all_memory()
    }
}

/// Commit stack and lock all process memory. See [`RtControl::lock_and_reserve`].
///
/// # Examples
///
/// ```no_run
/// # use agave_rt_utils::*;
/// # fn main() -> Result<(), RtError> {
/// lock_and_reserve(64 * 1024)?;
/// # Ok(())
/// # }
/// ```
pub fn lock_and_reserve(stack_size: usize) -> Result<(), RtError> {
    RtControl::system().lock_and_reserve(stack_size)
}

/// Unlock all process memory.
pub fn unlock_memory() -> Result<(), RtError> {
    RtControl::system().unlock_memory()
}
