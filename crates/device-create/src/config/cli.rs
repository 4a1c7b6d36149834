use std::path::PathBuf;

use clap::Parser;
use utils::version;

use super::{
    DEFAULT_DEV_ROOT, DEFAULT_DRIVER_VERSION, DEFAULT_PROC_DEVICES, DEFAULT_PROC_MODULES,
    DEFAULT_SYSFS_PCI,
};

/// Detect NVIDIA GPUs and create their device files
#[derive(Parser, Debug)]
#[command(about, long_about = None, version = &**version::VERSION)]
pub struct Cli {
    #[arg(long, help = "Compute and log the device plan without touching any device file")]
    pub dry_run: bool,

    #[arg(long, help = "Print diagnostics to stdout (or to the --log file)")]
    pub verbose: bool,

    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        help = "Write diagnostics to this file, falling back to stdout if it cannot be opened"
    )]
    pub log: Option<PathBuf>,

    #[arg(
        long,
        hide = true,
        env = "DEVICE_CREATE_PROC_MODULES",
        default_value = DEFAULT_PROC_MODULES
    )]
    pub proc_modules: PathBuf,

    #[arg(
        long,
        hide = true,
        env = "DEVICE_CREATE_PROC_DEVICES",
        default_value = DEFAULT_PROC_DEVICES
    )]
    pub proc_devices: PathBuf,

    #[arg(
        long,
        hide = true,
        env = "DEVICE_CREATE_SYSFS_PCI",
        value_hint = clap::ValueHint::DirPath,
        default_value = DEFAULT_SYSFS_PCI
    )]
    pub sysfs_pci: PathBuf,

    #[arg(
        long,
        hide = true,
        env = "DEVICE_CREATE_DEV_ROOT",
        value_hint = clap::ValueHint::DirPath,
        default_value = DEFAULT_DEV_ROOT
    )]
    pub dev_root: PathBuf,

    #[arg(
        long,
        hide = true,
        env = "DEVICE_CREATE_DRIVER_VERSION",
        default_value = DEFAULT_DRIVER_VERSION
    )]
    pub driver_version: PathBuf,
}
