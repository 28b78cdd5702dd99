#![cfg_attr(
    not(feature = "agave-unstable-api"),
    deprecated(
        since = "3.1.0",
        note = "This crate has been marked for formal inclusion in the Agave Unstable API. From \
                v4.0.0 onward, the `agave-unstable-api` crate feature must be specified to \
                acknowledge use of an interface that may break without warning."
    )
)]
// Activate some of the Rust 2024 lints to make the future migration easier.
#![warn(if_let_rescope)]
#![warn(keyword_idents_2024)]
#![warn(missing_unsafe_on_extern)]
#![warn(rust_2024_guarded_string_incompatible_syntax)]
#![warn(rust_2024_incompatible_pat)]
#![warn(tail_expr_drop_order)]
#![warn(unsafe_attr_outside_unsafe)]
#![warn(unsafe_op_in_unsafe_fn)]

//! Real-time control utilities for Linux systems.
//!
//! This crate wraps the kernel interfaces a latency-sensitive process needs to set itself
//! up: memory locking, RT throttling, CPU affinity, niceness and real-time scheduling
//! policies, and cpufreq governors. Every operation is available as a free function acting
//! on the running kernel, and as a method of [`RtControl`], which can be built over any
//! [`RtPlatform`].
//!
//! # Platform Support
//!
//! Linux only. All functions return [`RtError::NotSupported`] on other platforms.
//!
//! # Examples
//!
//! ```no_run
//! use agave_rt_utils::*;
//!
//! # fn main() -> Result<(), RtError> {
//! // Run the frequency at its maximum and let RT tasks use the whole CPU
//! set_governor_all(Governor::Performance)?;
//! disable_rt_throttling()?;
//!
//! // Pin this thread to an isolated CPU and make it SCHED_FIFO
//! let thread = current_thread();
//! if let Some(&cpu) = isolated_cpus()?.first() {
//!     set_thread_affinity(thread, [cpu as i32])?;
//! }
//! set_thread_rt_priority(thread, &RtPriority::new(SchedPolicy::Fifo, 80))?;
//!
//! // No page faults from here on
//! lock_and_reserve(512 * 1024)?;
//! # Ok(())
//! # }
//! ```
//!

mod affinity;
mod config;
mod control;
mod error;
#[cfg(any(test, feature = "dev-context-only-utils"))]
pub mod fake;
mod governor;
mod memlock;
mod periodic;
mod platform;
mod priority;
mod system;
mod throttling;
mod topology;

pub use {
    affinity::{
        process_affinity, process_affinity_into, process_current_cpu, set_process_affinity,
        set_thread_affinity, thread_affinity, thread_affinity_into, thread_current_cpu, CpuMask,
        CPU_SETSIZE,
    },
    config::RtConfig,
    control::RtControl,
    error::RtError,
    governor::{
        available_governors, governor, set_governor, set_governor_all, Governor, GovernorStatus,
    },
    memlock::{lock_and_reserve, unlock_memory},
    periodic::{run_periodic, PeriodicStats},
    platform::{Pid, RtPlatform, Target, ThreadHandle},
    priority::{
        current_thread, process_priority, process_rt_priority, set_process_priority,
        set_process_rt_priority, set_thread_priority, set_thread_rt_priority, thread_priority,
        thread_rt_priority, RtPriority, SchedPolicy, NICE_RANGE,
    },
    system::SystemPlatform,
    throttling::{
        disable_rt_throttling, rt_throttling, set_rt_runtime, RtThrottling, RT_PERIOD_PATH,
        RT_RUNTIME_PATH,
    },
    topology::{cpu_count, isolated_cpus, online_cpus},
};
