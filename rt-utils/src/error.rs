//! Error types for real-time control operations.

use {std::io, thiserror::Error};

/// Errors that can occur during real-time control operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RtError {
    /// I/O or system call error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation not supported on this platform
    #[error("real-time operations are not supported on this platform")]
    NotSupported,

    /// CPU is not online (or does not exist)
    #[error("CPU {cpu} is invalid (max CPU is {max})")]
    InvalidCpu { cpu: usize, max: usize },

    /// Niceness outside of `-20..=19`
    #[error("nice value {0} is out of range (-20..=19)")]
    InvalidNice(i32),

    /// Caller buffer cannot hold one entry per online CPU
    #[error("buffer holds {capacity} CPUs but {required} are online")]
    BufferTooSmall { capacity: usize, required: usize },

    /// Governor has no kernel name
    #[error("governor has no kernel name")]
    UnnamedGovernor,

    /// RT priority does not fit the kernel scheduler parameter
    #[error("RT priority {0} does not fit a scheduler parameter")]
    InvalidRtPriority(u32),

    /// Kernel reported a scheduling policy this crate does not know about
    #[error("unknown scheduling policy {0}")]
    UnknownPolicy(i32),

    /// Thread niceness requested for a thread other than the caller
    #[error("thread niceness can only be accessed from the target thread itself")]
    ForeignThread,

    /// Stack reservation would overflow the stack
    #[error(
        "stack reservation of {requested} bytes does not fit the {available} bytes left on the \
         thread stack"
    )]
    StackTooLarge { requested: usize, available: usize },

    /// Periodic task with a zero period
    #[error("period must be non-zero")]
    InvalidPeriod,

    /// Governor update stopped part-way through the online CPUs
    #[error("failed to set governor on CPU {cpu} (already updated: {updated:?}): {source}")]
    PartialGovernorUpdate {
        cpu: usize,
        updated: Vec<usize>,
        #[source]
        source: Box<RtError>,
    },

    /// Failed to parse a sysfs/procfs value
    #[error("failed to parse kernel attribute: {0}")]
    ParseError(String),

    /// Malformed configuration file
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),
}

impl RtError {
    /// Returns `true` for errors caused by a caller-supplied value that is out of contract.
    ///
    /// These are detected before any kernel state is touched.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::InvalidCpu { .. }
                | Self::InvalidNice(_)
                | Self::BufferTooSmall { .. }
                | Self::UnnamedGovernor
                | Self::InvalidRtPriority(_)
                | Self::ForeignThread
                | Self::StackTooLarge { .. }
                | Self::InvalidPeriod
        )
    }

    /// The OS error number behind this error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Io(err) => err.raw_os_error(),
            Self::PartialGovernorUpdate { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}
