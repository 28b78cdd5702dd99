//! Online and isolated CPU enumeration.

use {
    crate::{control::RtControl, error::RtError, platform::RtPlatform},
    log::debug,
    std::{collections::BTreeSet, path::Path},
};

/// Root of the per-CPU sysfs hierarchy.
pub(crate) const CPU_SYSFS_DIR: &str = "/sys/devices/system/cpu";

/// Largest `CONFIG_NR_CPUS` the kernel can be built with; higher CPU IDs are corrupt data.
const MAX_KERNEL_CPUS: usize = 8192;

impl<P: RtPlatform> RtControl<P> {
    /// Get the sorted list of online logical CPUs.
    ///
    /// Reads `/sys/devices/system/cpu/online` and falls back to
    /// `sysconf(_SC_NPROCESSORS_ONLN)` (assuming CPUs `0..count`) when sysfs is unavailable.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::Io`] if neither source is available.
    pub fn online_cpus(&self) -> Result<Vec<usize>, RtError> {
        let path = Path::new(CPU_SYSFS_DIR).join("online");
        match self.platform().read_attribute(&path) {
            Ok(content) => match parse_cpu_range_list(content.trim()) {
                Ok(cpus) if !cpus.is_empty() => return Ok(cpus),
                Ok(_) => debug!("{} is empty", path.display()),
                Err(err) => debug!("ignoring {}: {err}", path.display()),
            },
            Err(err) => debug!("cannot read {}: {err}", path.display()),
        }
        Ok((0..self.platform().online_cpu_count()?).collect())
    }

    /// Get the number of online logical CPUs (includes hyperthreads).
    pub fn cpu_count(&self) -> Result<usize, RtError> {
        Ok(self.online_cpus()?.len())
    }

    /// Get the list of isolated CPUs.
    ///
    /// Isolated CPUs are those reserved via kernel boot parameters (`isolcpus=...`)
    /// for low-latency or real-time workloads. The kernel scheduler avoids placing
    /// regular tasks on these CPUs.
    ///
    /// # Returns
    /// A sorted vector of isolated CPU IDs, or an empty vector if none are isolated.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::ParseError`] if the sysfs data is malformed.
    pub fn isolated_cpus(&self) -> Result<Vec<usize>, RtError> {
        let path = Path::new(CPU_SYSFS_DIR).join("isolated");
        match self.platform().read_attribute(&path) {
            Ok(content) => parse_cpu_range_list(content.trim()),
            // File doesn't exist or can't be read - no isolated CPUs
            Err(_) => Ok(Vec::new()),
        }
    }
}

/// Get the sorted list of online logical CPUs. See [`RtControl::online_cpus`].
pub fn online_cpus() -> Result<Vec<usize>, RtError> {
    RtControl::system().online_cpus()
}

/// Get the number of online logical CPUs. See [`RtControl::cpu_count`].
///
/// # Examples
///
/// ```no_run
/// # use agave_rt_utils::*;
/// # fn main() -> Result<(), RtError> {
/// let count = cpu_count()?;
/// println!("System has {} logical CPUs", count);
/// # Ok(())
/// # }
/// ```
pub fn cpu_count() -> Result<usize, RtError> {
    RtControl::system().cpu_count()
}

/// Get the list of isolated CPUs. See [`RtControl::isolated_cpus`].
///
/// # Examples
///
/// ```no_run
/// # use agave_rt_utils::*;
/// # fn main() -> Result<(), RtError> {
/// let isolated = isolated_cpus()?;
/// if let Some(&cpu) = isolated.first() {
///     set_process_affinity(0, [cpu as i32])?;
/// }
/// # Ok(())
/// # }
/// ```
pub fn isolated_cpus() -> Result<Vec<usize>, RtError> {
    RtControl::system().isolated_cpus()
}

/// Parse a CPU range list string (e.g., "0-3,5,7-9") into a sorted vector of CPU IDs.
pub(crate) fn parse_cpu_range_list(s: &str) -> Result<Vec<usize>, RtError> {
    let mut cpus = BTreeSet::new();

    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((start_str, end_str)) = part.split_once('-') {
            let start = start_str
                .trim()
                .parse::<usize>()
                .map_err(|_| RtError::ParseError(format!("invalid CPU range: {part}")))?;
            let end = end_str
                .trim()
                .parse::<usize>()
                .map_err(|_| RtError::ParseError(format!("invalid CPU range: {part}")))?;
            if start > end || end >= MAX_KERNEL_CPUS {
                return Err(RtError::ParseError(format!("invalid CPU range: {part}")));
            }

            cpus.extend(start..=end);
        } else {
            let cpu = part
                .parse::<usize>()
                .ok()
                .filter(|&cpu| cpu < MAX_KERNEL_CPUS)
                .ok_or_else(|| RtError::ParseError(format!("invalid CPU ID: {part}")))?;
            cpus.insert(cpu);
        }
    }

    Ok(cpus.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use {super::*, crate::fake::FakePlatform, assert_matches::assert_matches};

    #[test]
    fn test_parse_cpu_range_list() {
        // Test single CPU
        assert_eq!(parse_cpu_range_list("0").unwrap(), vec![0]);
        assert_eq!(parse_cpu_range_list("5").unwrap(), vec![5]);

        // Test ranges
        assert_eq!(parse_cpu_range_list("0-3").unwrap(), vec![0, 1, 2, 3]);

        // Test mixed single and ranges
        assert_eq!(
            parse_cpu_range_list("0-2,5,7-9").unwrap(),
            vec![0, 1, 2, 5, 7, 8, 9]
        );

        // Test with spaces
        assert_eq!(
            parse_cpu_range_list(" 0 - 2 , 5 , 7 - 9 ").unwrap(),
            vec![0, 1, 2, 5, 7, 8, 9]
        );

        // Test duplicates are removed
        assert_eq!(parse_cpu_range_list("0,1,0,2,1").unwrap(), vec![0, 1, 2]);

        // Test empty string and empty parts
        assert_eq!(parse_cpu_range_list("").unwrap(), Vec::<usize>::new());
        assert_eq!(parse_cpu_range_list("0,,2").unwrap(), vec![0, 2]);
    }

    #[test]
    fn test_parse_cpu_range_list_errors() {
        assert!(parse_cpu_range_list("abc").is_err());
        assert!(parse_cpu_range_list("0-abc").is_err());
        assert!(parse_cpu_range_list("-5").is_err());
        assert!(parse_cpu_range_list("5-").is_err());
    }

    #[test]
    fn test_parse_cpu_range_list_rejects_corrupt_bounds() {
        assert_matches!(
            parse_cpu_range_list("0-18446744073709551615"),
            Err(RtError::ParseError(_))
        );
        assert_matches!(parse_cpu_range_list("3-1"), Err(RtError::ParseError(_)));
        assert_matches!(parse_cpu_range_list("0,8192"), Err(RtError::ParseError(_)));
        assert_eq!(parse_cpu_range_list("8190-8191").unwrap(), vec![8190, 8191]);
    }

    #[test]
    fn test_corrupt_online_list_falls_back_to_sysconf() {
        let platform = FakePlatform::new(2);
        platform.set_attribute("/sys/devices/system/cpu/online", "0-18446744073709551615\n");
        let control = RtControl::new(platform);
        assert_eq!(control.online_cpus().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_online_cpus_from_sysfs() {
        let platform = FakePlatform::new(8);
        platform.set_attribute("/sys/devices/system/cpu/online", "0-1,4-5\n");
        let control = RtControl::new(platform);
        assert_eq!(control.online_cpus().unwrap(), vec![0, 1, 4, 5]);
        assert_eq!(control.cpu_count().unwrap(), 4);
    }

    #[test]
    fn test_online_cpus_falls_back_to_sysconf() {
        let platform = FakePlatform::new(3);
        platform.remove_attribute("/sys/devices/system/cpu/online");
        let control = RtControl::new(platform);
        assert_eq!(control.online_cpus().unwrap(), vec![0, 1, 2]);

        control
            .platform()
            .set_attribute("/sys/devices/system/cpu/online", "garbage\n");
        assert_eq!(control.online_cpus().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_isolated_cpus() {
        let control = RtControl::new(FakePlatform::new(4));
        assert!(control.isolated_cpus().unwrap().is_empty());

        control
            .platform()
            .set_attribute("/sys/devices/system/cpu/isolated", "\n");
        assert!(control.isolated_cpus().unwrap().is_empty());

        control
            .platform()
            .set_attribute("/sys/devices/system/cpu/isolated", "2-3\n");
        assert_eq!(control.isolated_cpus().unwrap(), vec![2, 3]);

        control
            .platform()
            .set_attribute("/sys/devices/system/cpu/isolated", "x\n");
        assert!(matches!(
            control.isolated_cpus().unwrap_err(),
            RtError::ParseError(_)
        ));
    }
}
