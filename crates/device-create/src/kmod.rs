//! Kernel module prober.
//!
//! Answers two questions from kernel-exposed text files:
//!
//! - whether a module is currently loaded, from the module list (`/proc/modules`)
//! - which character major a driver registered, from the device table (`/proc/devices`)
//!
//! Both lookups fail closed: an unreadable file means "not loaded" / "no major".

use std::fs;
use std::path::PathBuf;

use tracing::debug;
use tracing::warn;

use crate::config::SystemPaths;

/// Core driver; nothing is provisioned unless it is loaded.
pub const CORE_MODULE: &str = "nvidia";
/// Unified memory module, as listed in the module list.
pub const UVM_MODULE: &str = "nvidia_uvm";
/// Unified memory driver, as registered in the device table.
pub const UVM_CHARDEV: &str = "nvidia-uvm";
pub const MODESET_MODULE: &str = "nvidia_modeset";

const CHARACTER_DEVICES_HEADER: &str = "Character devices:\n";

/// Reads module and major-number information from the kernel's pseudo-files.
#[derive(Debug, Clone)]
pub struct ModuleProber {
    modules_path: PathBuf,
    devices_path: PathBuf,
}

impl ModuleProber {
    pub fn new(modules_path: impl Into<PathBuf>, devices_path: impl Into<PathBuf>) -> Self {
        Self {
            modules_path: modules_path.into(),
            devices_path: devices_path.into(),
        }
    }

    pub fn from_paths(paths: &SystemPaths) -> Self {
        Self::new(&paths.proc_modules, &paths.proc_devices)
    }

    /// Returns `true` if any loaded module's name contains `name`.
    ///
    /// The match is a substring test on the first token of each line, so
    /// `nvidia` is reported as loaded whenever `nvidia_uvm` is.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn is_loaded(&self, name: &str) -> bool {
        match fs::read_to_string(&self.modules_path) {
            Ok(content) => {
                let loaded = module_listed(&content, name);
                debug!(module = name, loaded, "Checked module list");
                loaded
            }
            Err(e) => {
                warn!(
                    path = %self.modules_path.display(),
                    error = %e,
                    "Can't open module list"
                );
                false
            }
        }
    }

    /// Looks up the character major registered under `name`.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn major_for(&self, name: &str) -> Option<u32> {
        match fs::read_to_string(&self.devices_path) {
            Ok(content) => {
                let major = find_char_major(&content, name);
                debug!(device = name, ?major, "Checked character device table");
                major
            }
            Err(e) => {
                warn!(
                    path = %self.devices_path.display(),
                    error = %e,
                    "Can't open character device table"
                );
                None
            }
        }
    }
}

/// Substring match of `name` against the first token of every line.
fn module_listed(content: &str, name: &str) -> bool {
    content.lines().any(|line| {
        line.split([' ', '\t'])
            .find(|token| !token.is_empty())
            .is_some_and(|token| token.contains(name))
    })
}

/// Scans the `Character devices:` section for a line ending in exactly `name`.
///
/// Only the first occurrence of `name` in a line is considered, and it must be
/// followed by the line's newline, so `foo` does not match `foobar`.
fn find_char_major(content: &str, name: &str) -> Option<u32> {
    let mut lines = content.split_inclusive('\n');

    lines.find(|line| *line == CHARACTER_DEVICES_HEADER)?;

    for line in lines {
        if line == "\n" {
            break;
        }

        let Some(pos) = line.find(name) else {
            continue;
        };

        if &line[pos + name.len()..] == "\n" {
            return line.split_whitespace().next()?.parse().ok();
        }
    }

    None
}
