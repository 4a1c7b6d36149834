//! In-memory [`DeviceFs`] with fault injection.
//!
//! Creating character devices needs `CAP_MKNOD` and root ownership, so the
//! reconciliation logic is exercised against this adapter instead of `/dev`.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use super::DeviceFs;
use super::DeviceNumber;
use super::NodeKind;
use super::NodeStat;

const MAX_MAJOR: u32 = 0xfff;
const MAX_MINOR: u32 = 0xfffff;

/// Filesystem operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsOp {
    Stat,
    Mknod,
    Chmod,
    Chown,
    Unlink,
}

#[derive(Debug)]
struct State {
    entries: BTreeMap<PathBuf, NodeStat>,
    failing: HashSet<FsOp>,
    umask: u32,
    creator: (u32, u32),
    mutations: Vec<(FsOp, PathBuf)>,
}

/// Flat map of paths to entries; parent directories are not modelled.
#[derive(Debug)]
pub struct MemoryFs {
    state: Mutex<State>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    /// Empty filesystem with a zero umask where new nodes belong to root.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                entries: BTreeMap::new(),
                failing: HashSet::new(),
                umask: 0,
                creator: (0, 0),
                mutations: Vec::new(),
            }),
        }
    }

    pub fn with_umask(self, umask: u32) -> Self {
        self.state().umask = umask;
        self
    }

    /// Owner given to nodes created by `mknod`.
    pub fn with_creator(self, uid: u32, gid: u32) -> Self {
        self.state().creator = (uid, gid);
        self
    }

    pub fn insert(&self, path: impl Into<PathBuf>, stat: NodeStat) {
        self.state().entries.insert(path.into(), stat);
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<NodeStat> {
        self.state().entries.get(path.as_ref()).copied()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.state().entries.keys().cloned().collect()
    }

    /// Makes every subsequent `op` fail with `EROFS` (`EIO` for stat).
    pub fn fail(&self, op: FsOp) {
        self.state().failing.insert(op);
    }

    pub fn heal(&self, op: FsOp) {
        self.state().failing.remove(&op);
    }

    /// Successful mutating operations, in order.
    pub fn mutations(&self) -> Vec<(FsOp, PathBuf)> {
        self.state().mutations.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl State {
    fn check(&self, op: FsOp) -> io::Result<()> {
        if !self.failing.contains(&op) {
            return Ok(());
        }
        let errno = match op {
            FsOp::Stat => libc::EIO,
            _ => libc::EROFS,
        };
        Err(io::Error::from_raw_os_error(errno))
    }

    fn entry_mut(&mut self, path: &Path) -> io::Result<&mut NodeStat> {
        self.entries
            .get_mut(path)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
    }

    fn record(&mut self, op: FsOp, path: &Path) {
        self.mutations.push((op, path.to_path_buf()));
    }
}

impl DeviceFs for MemoryFs {
    fn stat(&self, path: &Path) -> io::Result<Option<NodeStat>> {
        let state = self.state();
        state.check(FsOp::Stat)?;
        Ok(state.entries.get(path).copied())
    }

    fn mknod_char(&self, path: &Path, mode: u32, device: DeviceNumber) -> io::Result<()> {
        let mut state = self.state();
        state.check(FsOp::Mknod)?;

        if state.entries.contains_key(path) {
            return Err(io::Error::from_raw_os_error(libc::EEXIST));
        }
        if device.major > MAX_MAJOR || device.minor > MAX_MINOR {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }

        let (uid, gid) = state.creator;
        let stat = NodeStat {
            kind: NodeKind::CharDevice,
            rdev: device,
            mode: mode & 0o7777 & !state.umask,
            uid,
            gid,
        };
        state.entries.insert(path.to_path_buf(), stat);
        state.record(FsOp::Mknod, path);
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        let mut state = self.state();
        state.check(FsOp::Chmod)?;
        state.entry_mut(path)?.mode = mode & 0o7777;
        state.record(FsOp::Chmod, path);
        Ok(())
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        let mut state = self.state();
        state.check(FsOp::Chown)?;
        let entry = state.entry_mut(path)?;
        entry.uid = uid;
        entry.gid = gid;
        state.record(FsOp::Chown, path);
        Ok(())
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state();
        state.check(FsOp::Unlink)?;

        if state.entry_mut(path)?.kind == NodeKind::Directory {
            return Err(io::Error::from_raw_os_error(libc::EISDIR));
        }
        state.entries.remove(path);
        state.record(FsOp::Unlink, path);
        Ok(())
    }
}
