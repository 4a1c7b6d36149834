//! Device node inspection and reconciliation.

pub mod host;
pub mod memory;
mod sync;

use std::fmt;
use std::io;
use std::path::Path;

pub use host::HostFs;
pub use memory::MemoryFs;
pub use sync::NodeError;
pub use sync::NodeOutcome;
pub use sync::NodeSynchronizer;

/// Permission bits compared during reconciliation.
pub const PERMISSION_MASK: u32 = 0o777;

/// Major/minor pair of a device special file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceNumber {
    pub major: u32,
    pub minor: u32,
}

impl DeviceNumber {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for DeviceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    CharDevice,
    BlockDevice,
    File,
    Directory,
    Symlink,
    Other,
}

/// The attributes of a filesystem entry that reconciliation looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStat {
    pub kind: NodeKind,
    /// Only meaningful for device special files.
    pub rdev: DeviceNumber,
    /// Permission bits, including setuid/setgid/sticky.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

/// The filesystem operations needed to converge device nodes.
///
/// `stat` does not follow a symlink at the path, like `lstat(2)`.
pub trait DeviceFs {
    /// Returns `Ok(None)` when nothing exists at `path`.
    fn stat(&self, path: &Path) -> io::Result<Option<NodeStat>>;

    /// Creates a character special file; `mode` is subject to the umask.
    fn mknod_char(&self, path: &Path, mode: u32, device: DeviceNumber) -> io::Result<()>;

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()>;

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()>;

    fn unlink(&self, path: &Path) -> io::Result<()>;
}

impl<T: DeviceFs + ?Sized> DeviceFs for &T {
    fn stat(&self, path: &Path) -> io::Result<Option<NodeStat>> {
        (**self).stat(path)
    }

    fn mknod_char(&self, path: &Path, mode: u32, device: DeviceNumber) -> io::Result<()> {
        (**self).mknod_char(path, mode, device)
    }

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        (**self).chmod(path, mode)
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        (**self).chown(path, uid, gid)
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        (**self).unlink(path)
    }
}
