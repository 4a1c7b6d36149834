//! Turns the classifier count and module states into target device nodes.

use std::path::Path;
use std::path::PathBuf;

use tracing::warn;

use crate::kmod::ModuleProber;
use crate::kmod::MODESET_MODULE;
use crate::kmod::UVM_CHARDEV;
use crate::kmod::UVM_MODULE;
use crate::node::DeviceNumber;

/// Character major of the GPU, control and modeset nodes.
pub const NVIDIA_MAJOR: u32 = 195;
pub const CONTROL_MINOR: u32 = 255;
pub const MODESET_MINOR: u32 = 254;
pub const UVM_MINOR: u32 = 0;
pub const UVM_TOOLS_MINOR: u32 = 1;

/// Highest number of GPUs that get a node; the rest are ignored.
pub const MAX_DEVICES: usize = 200;

/// rw for user, group and other.
pub const DEVICE_MODE: u32 = 0o666;
pub const DEVICE_UID: u32 = 0;
pub const DEVICE_GID: u32 = 0;

/// Major used for the UVM nodes when the driver has no entry in the device table.
///
/// No kernel accepts it, so node creation fails and is reported for those specs.
pub const UNRESOLVED_MAJOR: u32 = u32::MAX;

/// A device special file that should exist after the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetNodeSpec {
    pub path: PathBuf,
    pub device: DeviceNumber,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl TargetNodeSpec {
    fn new(path: PathBuf, major: u32, minor: u32) -> Self {
        Self {
            path,
            device: DeviceNumber::new(major, minor),
            mode: DEVICE_MODE,
            uid: DEVICE_UID,
            gid: DEVICE_GID,
        }
    }
}

/// Whether an optional module is loaded, plus the major it registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModuleState {
    pub loaded: bool,
    pub major: Option<u32>,
}

impl ModuleState {
    pub const fn absent() -> Self {
        Self {
            loaded: false,
            major: None,
        }
    }

    pub const fn loaded() -> Self {
        Self {
            loaded: true,
            major: None,
        }
    }

    pub const fn loaded_with_major(major: u32) -> Self {
        Self {
            loaded: true,
            major: Some(major),
        }
    }
}

/// State of the optional modules that gate extra nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModuleStates {
    pub uvm: ModuleState,
    pub modeset: ModuleState,
}

impl ModuleStates {
    pub fn probe(prober: &ModuleProber) -> Self {
        let uvm = if prober.is_loaded(UVM_MODULE) {
            ModuleState {
                loaded: true,
                major: prober.major_for(UVM_CHARDEV),
            }
        } else {
            ModuleState::absent()
        };

        let modeset = if prober.is_loaded(MODESET_MODULE) {
            ModuleState::loaded()
        } else {
            ModuleState::absent()
        };

        Self { uvm, modeset }
    }
}

/// Builds the ordered list of nodes for `candidate_count` GPUs under `dev_root`.
///
/// Order: control node, one node per GPU index, the two UVM nodes, the modeset node.
/// Nothing is planned without GPUs.
pub fn build_plan(
    dev_root: &Path,
    candidate_count: usize,
    modules: &ModuleStates,
) -> Vec<TargetNodeSpec> {
    if candidate_count == 0 {
        return Vec::new();
    }

    let count = if candidate_count > MAX_DEVICES {
        warn!(
            "Too many devices {candidate_count}. Max supported {MAX_DEVICES}. Ignoring the rest."
        );
        MAX_DEVICES
    } else {
        candidate_count
    };

    let mut plan = Vec::with_capacity(count + 4);

    plan.push(TargetNodeSpec::new(
        dev_root.join("nvidiactl"),
        NVIDIA_MAJOR,
        CONTROL_MINOR,
    ));

    for index in 0..count as u32 {
        plan.push(TargetNodeSpec::new(
            dev_root.join(format!("nvidia{index}")),
            NVIDIA_MAJOR,
            index,
        ));
    }

    if modules.uvm.loaded {
        let major = modules.uvm.major.unwrap_or_else(|| {
            warn!("Can't resolve the {UVM_CHARDEV} major, creating its nodes anyway");
            UNRESOLVED_MAJOR
        });
        plan.push(TargetNodeSpec::new(
            dev_root.join("nvidia-uvm"),
            major,
            UVM_MINOR,
        ));
        plan.push(TargetNodeSpec::new(
            dev_root.join("nvidia-uvm-tools"),
            major,
            UVM_TOOLS_MINOR,
        ));
    }

    if modules.modeset.loaded {
        plan.push(TargetNodeSpec::new(
            dev_root.join("nvidia-modeset"),
            NVIDIA_MAJOR,
            MODESET_MINOR,
        ));
    }

    plan
}
