//! CPU frequency governor selection through sysfs.

use {
    crate::{control::RtControl, error::RtError, platform::RtPlatform, topology::CPU_SYSFS_DIR},
    log::{debug, warn},
    serde::{Deserialize, Serialize},
    std::{fmt, io, path::PathBuf},
};

/// CPU frequency scaling governor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Governor {
    /// Any governor without a name in this enumeration
    Other,
    /// CPUs run at their lowest frequency
    Powersave,
    /// CPUs run at their highest frequency
    Performance,
    /// Frequency follows the load
    Ondemand,
    /// Like `Ondemand`, with gradual frequency changes
    Conservative,
}

impl Governor {
    /// Name of the governor in `scaling_governor`, `None` for [`Governor::Other`].
    pub fn kernel_name(&self) -> Option<&'static str> {
        match self {
            Self::Other => None,
            Self::Powersave => Some("powersave"),
            Self::Performance => Some("performance"),
            Self::Ondemand => Some("ondemand"),
            Self::Conservative => Some("conservative"),
        }
    }

    /// Case-sensitive lookup of a kernel governor name.
    pub fn from_kernel_name(name: &str) -> Option<Self> {
        match name {
            "powersave" => Some(Self::Powersave),
            "performance" => Some(Self::Performance),
            "ondemand" => Some(Self::Ondemand),
            "conservative" => Some(Self::Conservative),
            _ => None,
        }
    }
}

impl fmt::Display for Governor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kernel_name().unwrap_or("other"))
    }
}

/// Outcome of reading the governor of a CPU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GovernorStatus {
    /// The CPU runs one of the known governors
    Active(Governor),
    /// The CPU runs a governor this crate has no name for (e.g. `schedutil`)
    Unrecognized(String),
    /// The governor could not be read: no cpufreq support, no such CPU, or no permission
    Unsupported(io::ErrorKind),
}

impl GovernorStatus {
    /// The governor, with everything that is not a known governor collapsed to
    /// [`Governor::Other`].
    pub fn governor(&self) -> Governor {
        match self {
            Self::Active(governor) => *governor,
            Self::Unrecognized(_) | Self::Unsupported(_) => Governor::Other,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported(_))
    }
}

fn cpufreq_path(cpu: usize, attribute: &str) -> PathBuf {
    PathBuf::from(format!("{CPU_SYSFS_DIR}/cpu{cpu}/cpufreq/{attribute}"))
}

impl<P: RtPlatform> RtControl<P> {
    /// Switch the frequency governor of one CPU.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::InvalidCpu`] if `cpu` is not online.
    /// Returns [`RtError::UnnamedGovernor`] for [`Governor::Other`].
    /// Returns [`RtError::Io`] if the sysfs attribute cannot be opened or the kernel rejects
    /// the governor.
    pub fn set_governor(&self, governor: Governor, cpu: usize) -> Result<(), RtError> {
        let online = self.online_cpus()?;
        if !online.contains(&cpu) {
            return Err(RtError::InvalidCpu {
                cpu,
                max: online.last().copied().unwrap_or_default(),
            });
        }
        self.write_governor(governor, cpu)
    }

    fn write_governor(&self, governor: Governor, cpu: usize) -> Result<(), RtError> {
        let name = governor.kernel_name().ok_or(RtError::UnnamedGovernor)?;
        debug!("setting governor of CPU {cpu} to {name}");
        self.platform()
            .write_attribute(&cpufreq_path(cpu, "scaling_governor"), name)?;
        Ok(())
    }

    /// Switch the frequency governor of every online CPU, in ascending CPU order.
    ///
    /// Stops at the first CPU that fails. CPUs updated before it keep the new governor.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::PartialGovernorUpdate`] naming the failed CPU and the CPUs that were
    /// already switched.
    pub fn set_governor_all(&self, governor: Governor) -> Result<(), RtError> {
        let online = self.online_cpus()?;
        let mut updated = Vec::with_capacity(online.len());
        for cpu in online {
            if let Err(err) = self.write_governor(governor, cpu) {
                warn!(
                    "governor update to {governor} stopped at CPU {cpu}, CPUs {updated:?} already \
                     switched: {err}"
                );
                return Err(RtError::PartialGovernorUpdate {
                    cpu,
                    updated,
                    source: Box::new(err),
                });
            }
            updated.push(cpu);
        }
        Ok(())
    }

    /// Read the frequency governor of a CPU. Never fails: read errors are reported as
    /// [`GovernorStatus::Unsupported`].
    pub fn governor(&self, cpu: usize) -> GovernorStatus {
        match self.online_cpus() {
            Ok(online) if online.contains(&cpu) => {}
            Ok(_) => return GovernorStatus::Unsupported(io::ErrorKind::InvalidInput),
            Err(RtError::Io(err)) => return GovernorStatus::Unsupported(err.kind()),
            Err(_) => return GovernorStatus::Unsupported(io::ErrorKind::Unsupported),
        }

        match self
            .platform()
            .read_attribute(&cpufreq_path(cpu, "scaling_governor"))
        {
            Ok(value) => {
                let value = value.strip_suffix('\n').unwrap_or(value.as_str());
                match Governor::from_kernel_name(value) {
                    Some(governor) => GovernorStatus::Active(governor),
                    None => GovernorStatus::Unrecognized(value.to_string()),
                }
            }
            Err(err) => GovernorStatus::Unsupported(err.kind()),
        }
    }

    /// Names of the governors the kernel offers for a CPU.
    pub fn available_governors(&self, cpu: usize) -> Result<Vec<String>, RtError> {
        let content = self
            .platform()
            .read_attribute(&cpufreq_path(cpu, "scaling_available_governors"))?;
        Ok(content.split_whitespace().map(str::to_string).collect())
    }
}

/// Switch the frequency governor of one CPU. See [`RtControl::set_governor`].
///
/// # Examples
///
/// ```no_run
/// # use agave_rt_utils::*;
/// # fn main() -> Result<(), RtError> {
/// set_governor(Governor::Performance, 0)?;
/// assert_eq!(governor(0), GovernorStatus::Active(Governor::Performance));
/// # Ok(())
/// # }
/// ```
pub fn set_governor(governor: Governor, cpu: usize) -> Result<(), RtError> {
    RtControl::system().set_governor(governor, cpu)
}

/// Switch the frequency governor of every online CPU. See [`RtControl::set_governor_all`].
pub fn set_governor_all(governor: Governor) -> Result<(), RtError> {
    RtControl::system().set_governor_all(governor)
}

/// Read the frequency governor of a CPU. See [`RtControl::governor`].
pub fn governor(cpu: usize) -> GovernorStatus {
    RtControl::system().governor(cpu)
}

/// Names of the governors the kernel offers for a CPU.
pub fn available_governors(cpu: usize) -> Result<Vec<String>, RtError> {
    RtControl::system().available_governors(cpu)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::fake::{FakePlatform, AVAILABLE_GOVERNORS},
        assert_matches::assert_matches,
        test_case::test_case,
    };

    #[test_case(Governor::Powersave, "powersave")]
    #[test_case(Governor::Performance, "performance")]
    #[test_case(Governor::Ondemand, "ondemand")]
    #[test_case(Governor::Conservative, "conservative")]
    fn test_kernel_names(governor: Governor, name: &str) {
        assert_eq!(governor.kernel_name(), Some(name));
        assert_eq!(Governor::from_kernel_name(name), Some(governor));
        assert_eq!(governor.to_string(), name);
    }

    #[test]
    fn test_kernel_names_are_case_sensitive() {
        assert_eq!(Governor::from_kernel_name("Performance"), None);
        assert_eq!(Governor::from_kernel_name("performance\n"), None);
        assert_eq!(Governor::Other.kernel_name(), None);
    }

    #[test]
    fn test_set_then_get_governor() {
        let control = RtControl::new(FakePlatform::new(2));
        assert_eq!(
            control.governor(0),
            GovernorStatus::Active(Governor::Powersave)
        );
        control.set_governor(Governor::Performance, 0).unwrap();
        assert_eq!(
            control.governor(0),
            GovernorStatus::Active(Governor::Performance)
        );
        assert_eq!(
            control.platform().attribute_writes(),
            vec![(
                PathBuf::from("/sys/devices/system/cpu/cpu0/cpufreq/scaling_governor"),
                "performance".to_string()
            )]
        );
        assert_eq!(
            control.governor(1),
            GovernorStatus::Active(Governor::Powersave)
        );
    }

    #[test]
    fn test_set_governor_validation() {
        let control = RtControl::new(FakePlatform::new(2));
        assert_matches!(
            control.set_governor(Governor::Performance, 2),
            Err(RtError::InvalidCpu { cpu: 2, max: 1 })
        );
        assert_matches!(
            control.set_governor(Governor::Other, 0),
            Err(RtError::UnnamedGovernor)
        );
        assert!(control.platform().attribute_writes().is_empty());
    }

    #[test]
    fn test_without_cpufreq_support() {
        let control = RtControl::new(FakePlatform::new(1));
        control
            .platform()
            .remove_attribute("/sys/devices/system/cpu/cpu0/cpufreq/scaling_governor");

        let err = control.set_governor(Governor::Performance, 0).unwrap_err();
        assert_matches!(err, RtError::Io(ref e) if e.kind() == io::ErrorKind::NotFound);
        let status = control.governor(0);
        assert_eq!(status, GovernorStatus::Unsupported(io::ErrorKind::NotFound));
        assert_eq!(status.governor(), Governor::Other);
        assert!(!status.is_supported());
    }

    #[test]
    fn test_unrecognized_governor_is_kept() {
        let control = RtControl::new(FakePlatform::new(1));
        control.platform().set_attribute(
            "/sys/devices/system/cpu/cpu0/cpufreq/scaling_governor",
            "schedutil\n",
        );
        let status = control.governor(0);
        assert_eq!(status, GovernorStatus::Unrecognized("schedutil".to_string()));
        assert_eq!(status.governor(), Governor::Other);
        assert!(status.is_supported());
    }

    #[test]
    fn test_only_the_trailing_newline_is_stripped() {
        let control = RtControl::new(FakePlatform::new(1));
        let path = "/sys/devices/system/cpu/cpu0/cpufreq/scaling_governor";

        control.platform().set_attribute(path, "performance");
        assert_eq!(
            control.governor(0),
            GovernorStatus::Active(Governor::Performance)
        );

        control.platform().set_attribute(path, "performance \n");
        assert_eq!(
            control.governor(0),
            GovernorStatus::Unrecognized("performance ".to_string())
        );
    }

    #[test]
    fn test_governor_of_offline_cpu() {
        let control = RtControl::new(FakePlatform::new(2));
        assert_eq!(
            control.governor(7),
            GovernorStatus::Unsupported(io::ErrorKind::InvalidInput)
        );
    }

    #[test]
    fn test_set_governor_all() {
        let control = RtControl::new(FakePlatform::new(4));
        control.set_governor_all(Governor::Ondemand).unwrap();
        for cpu in 0..4 {
            assert_eq!(
                control.governor(cpu),
                GovernorStatus::Active(Governor::Ondemand)
            );
        }
    }

    #[test]
    fn test_set_governor_all_partial_failure() {
        let control = RtControl::new(FakePlatform::new(4));
        control
            .platform()
            .deny_writes("/sys/devices/system/cpu/cpu2/cpufreq/scaling_governor");

        let err = control.set_governor_all(Governor::Performance).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EACCES));
        assert_matches!(
            err,
            RtError::PartialGovernorUpdate { cpu: 2, ref updated, .. } if updated == &[0, 1]
        );

        let governors: Vec<_> = (0..4).map(|cpu| control.governor(cpu).governor()).collect();
        assert_eq!(
            governors,
            vec![
                Governor::Performance,
                Governor::Performance,
                Governor::Powersave,
                Governor::Powersave,
            ]
        );
    }

    #[test]
    fn test_set_governor_all_failing_first_cpu() {
        let control = RtControl::new(FakePlatform::new(2));
        assert_matches!(
            control.set_governor_all(Governor::Other),
            Err(RtError::PartialGovernorUpdate { cpu: 0, ref updated, .. }) if updated.is_empty()
        );
    }

    #[test]
    fn test_available_governors() {
        let control = RtControl::new(FakePlatform::new(1));
        assert_eq!(
            control.available_governors(0).unwrap(),
            AVAILABLE_GOVERNORS
                .split(' ')
                .map(str::to_string)
                .collect::<Vec<_>>()
        );
        assert!(control.available_governors(1).is_err());
    }

    #[test]
    fn test_governor_serde_names() {
        let governor: Governor = serde_json::from_str(r#""conservative""#).unwrap();
        assert_eq!(governor, Governor::Conservative);
        assert_eq!(
            serde_json::to_string(&Governor::Performance).unwrap(),
            r#""performance""#
        );
    }
}
