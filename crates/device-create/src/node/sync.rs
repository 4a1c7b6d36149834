use std::io;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::DeviceFs;
use super::NodeKind;
use super::NodeStat;
use super::PERMISSION_MASK;
use crate::plan::TargetNodeSpec;

/// What reconciliation did to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Already correct, nothing was touched.
    Unchanged,
    /// Nothing existed at the path and the node was created.
    Created,
    /// An existing entry was repaired or replaced.
    Fixed,
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Failed to inspect {}: {source}", path.display())]
    Inspect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to create device {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Device {} disappeared right after creation", path.display())]
    Vanished { path: PathBuf },
    #[error("Device {} could not be reconciled", path.display())]
    Unresolved { path: PathBuf },
}

/// Classification of an existing entry against its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Reconciled,
    /// Right device, wrong permission bits or owner.
    WrongPerm,
    /// A character device with the wrong device number.
    WrongDevice { perm_ok: bool },
    /// Not a character device at all.
    WrongType,
}

impl NodeState {
    fn assess(stat: &NodeStat, spec: &TargetNodeSpec) -> Self {
        if stat.kind != NodeKind::CharDevice {
            return NodeState::WrongType;
        }

        let perm_ok = stat.mode & PERMISSION_MASK == spec.mode & PERMISSION_MASK
            && stat.uid == spec.uid
            && stat.gid == spec.gid;

        match (stat.rdev == spec.device, perm_ok) {
            (true, true) => NodeState::Reconciled,
            (true, false) => NodeState::WrongPerm,
            (false, perm_ok) => NodeState::WrongDevice { perm_ok },
        }
    }
}

/// Converges device nodes to their [`TargetNodeSpec`], one spec at a time.
///
/// Missing nodes are created and bad permissions or ownership are fixed in place.
/// Entries that are not character devices are removed and recreated without
/// being modified first. A character device with the wrong number is only
/// replaced when its permissions are already right or cannot be fixed; a
/// successful permission fix ends reconciliation for that node.
/// Replacement is attempted at most once per spec.
pub struct NodeSynchronizer<F: DeviceFs> {
    fs: F,
}

impl<F: DeviceFs> NodeSynchronizer<F> {
    pub fn new(fs: F) -> Self {
        Self { fs }
    }

    #[tracing::instrument(level = "debug", skip(self, spec), fields(path = %spec.path.display(), device = %spec.device))]
    pub fn reconcile(&self, spec: &TargetNodeSpec) -> Result<NodeOutcome, NodeError> {
        let path = spec.path.as_path();
        let mut initially_absent = None;
        let mut created = false;
        let mut touched = false;
        let mut retried = false;

        loop {
            let current = match self.stat(path)? {
                Some(stat) => {
                    initially_absent.get_or_insert(false);
                    stat
                }
                None => {
                    initially_absent.get_or_insert(true);
                    info!("Creating device {}", path.display());
                    self.fs
                        .mknod_char(path, spec.mode, spec.device)
                        .map_err(|source| {
                            warn!("Failed to create device {}", path.display());
                            NodeError::Create {
                                path: path.to_path_buf(),
                                source,
                            }
                        })?;
                    created = true;
                    touched = true;
                    self.stat(path)?.ok_or_else(|| NodeError::Vanished {
                        path: path.to_path_buf(),
                    })?
                }
            };

            match NodeState::assess(&current, spec) {
                NodeState::Reconciled => {
                    debug!("{} is a char device with the correct permissions", path.display());
                    return Ok(outcome(initially_absent, touched));
                }
                NodeState::WrongPerm => {
                    info!(
                        mode = %format!("{:o}", current.mode),
                        uid = current.uid,
                        gid = current.gid,
                        "{} exists, but does not have the correct permissions",
                        path.display()
                    );
                    if self.fix_permissions(spec) {
                        return Ok(outcome(initially_absent, true));
                    }
                }
                NodeState::WrongDevice { perm_ok } => {
                    info!(
                        device = %current.rdev,
                        "{} has the wrong device number",
                        path.display()
                    );
                    if !perm_ok && self.fix_permissions(spec) {
                        warn!(
                            "{} keeps device {} after its permissions were fixed",
                            path.display(),
                            current.rdev
                        );
                        return Ok(outcome(initially_absent, true));
                    }
                }
                NodeState::WrongType => {
                    info!(kind = ?current.kind, "{} is not a char device", path.display());
                }
            }

            info!("Removing device {}", path.display());
            match self.fs.unlink(path) {
                Ok(()) => touched = true,
                Err(e) => warn!(error = %e, "Failed to remove {}", path.display()),
            }

            if created || retried {
                return Err(NodeError::Unresolved {
                    path: path.to_path_buf(),
                });
            }
            retried = true;
        }
    }

    fn stat(&self, path: &Path) -> Result<Option<NodeStat>, NodeError> {
        self.fs.stat(path).map_err(|source| NodeError::Inspect {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies the target mode and owner, returning whether both succeeded.
    fn fix_permissions(&self, spec: &TargetNodeSpec) -> bool {
        let path = spec.path.as_path();
        let result = self
            .fs
            .chmod(path, spec.mode)
            .and_then(|()| self.fs.chown(path, spec.uid, spec.gid));

        match result {
            Ok(()) => {
                info!("Permissions for {} fixed", path.display());
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed fixing permissions for {}", path.display());
                false
            }
        }
    }
}

fn outcome(initially_absent: Option<bool>, touched: bool) -> NodeOutcome {
    match (initially_absent, touched) {
        (Some(true), _) => NodeOutcome::Created,
        (_, true) => NodeOutcome::Fixed,
        (_, false) => NodeOutcome::Unchanged,
    }
}
