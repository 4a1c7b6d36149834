pub mod cli;

use std::path::PathBuf;

use utils::logging::LogTarget;

pub use cli::*;

pub const DEFAULT_PROC_MODULES: &str = "/proc/modules";
pub const DEFAULT_PROC_DEVICES: &str = "/proc/devices";
pub const DEFAULT_SYSFS_PCI: &str = "/sys/bus/pci/devices";
pub const DEFAULT_DEV_ROOT: &str = "/dev";
pub const DEFAULT_DRIVER_VERSION: &str = "/sys/module/nvidia/version";

/// Locations of the kernel interfaces read and written during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPaths {
    /// Loaded module list, one module per line.
    pub proc_modules: PathBuf,
    /// Registered block and character majors.
    pub proc_devices: PathBuf,
    /// One directory per PCI function, named after its bus address.
    pub sysfs_pci: PathBuf,
    /// Directory receiving the device nodes.
    pub dev_root: PathBuf,
    pub driver_version: PathBuf,
}

impl Default for SystemPaths {
    fn default() -> Self {
        Self {
            proc_modules: PathBuf::from(DEFAULT_PROC_MODULES),
            proc_devices: PathBuf::from(DEFAULT_PROC_DEVICES),
            sysfs_pci: PathBuf::from(DEFAULT_SYSFS_PCI),
            dev_root: PathBuf::from(DEFAULT_DEV_ROOT),
            driver_version: PathBuf::from(DEFAULT_DRIVER_VERSION),
        }
    }
}

/// Run configuration, built once from the command line and passed down by reference.
#[derive(Debug, Clone)]
pub struct Config {
    pub dry_run: bool,
    pub log_target: LogTarget,
    pub paths: SystemPaths,
}

impl From<&Cli> for Config {
    fn from(cli: &Cli) -> Self {
        Self {
            dry_run: cli.dry_run,
            log_target: LogTarget::from_flags(cli.verbose, cli.log.clone()),
            paths: SystemPaths {
                proc_modules: cli.proc_modules.clone(),
                proc_devices: cli.proc_devices.clone(),
                sysfs_pci: cli.sysfs_pci.clone(),
                dev_root: cli.dev_root.clone(),
                driver_version: cli.driver_version.clone(),
            },
        }
    }
}
