use std::ffi::CString;
use std::fs;
use std::fs::Metadata;
use std::fs::Permissions;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::fs::MetadataExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use super::DeviceFs;
use super::DeviceNumber;
use super::NodeKind;
use super::NodeStat;

/// [`DeviceFs`] operating on the real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostFs;

impl DeviceFs for HostFs {
    fn stat(&self, path: &Path) -> io::Result<Option<NodeStat>> {
        match fs::symlink_metadata(path) {
            Ok(metadata) => Ok(Some(node_stat(&metadata))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn mknod_char(&self, path: &Path, mode: u32, device: DeviceNumber) -> io::Result<()> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let dev = libc::makedev(device.major, device.minor);

        // SAFETY: `c_path` is a valid NUL-terminated string that outlives the call.
        let ret =
            unsafe { libc::mknod(c_path.as_ptr(), libc::S_IFCHR | mode as libc::mode_t, dev) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::set_permissions(path, Permissions::from_mode(mode))
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        std::os::unix::fs::chown(path, Some(uid), Some(gid))
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

fn node_stat(metadata: &Metadata) -> NodeStat {
    let file_type = metadata.file_type();
    let kind = if file_type.is_char_device() {
        NodeKind::CharDevice
    } else if file_type.is_block_device() {
        NodeKind::BlockDevice
    } else if file_type.is_file() {
        NodeKind::File
    } else if file_type.is_dir() {
        NodeKind::Directory
    } else if file_type.is_symlink() {
        NodeKind::Symlink
    } else {
        NodeKind::Other
    };

    let rdev = metadata.rdev() as libc::dev_t;

    NodeStat {
        kind,
        rdev: DeviceNumber::new(libc::major(rdev), libc::minor(rdev)),
        mode: metadata.mode() & 0o7777,
        uid: metadata.uid(),
        gid: metadata.gid(),
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use super::*;
    use crate::node::NodeSynchronizer;
    use crate::plan::TargetNodeSpec;

    #[test]
    fn missing_path_stats_as_none() {
        let dir = tempfile::tempdir().unwrap();

        assert_eq!(HostFs.stat(&dir.path().join("nvidia0")).unwrap(), None);
    }

    #[test]
    fn regular_file_is_reported_with_its_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nvidiactl");
        fs::write(&path, "").unwrap();
        HostFs.chmod(&path, 0o640).unwrap();

        let stat = HostFs.stat(&path).unwrap().unwrap();

        assert_eq!(stat.kind, NodeKind::File);
        assert_eq!(stat.mode, 0o640);
    }

    #[test]
    fn null_device_is_a_char_device() {
        let stat = HostFs.stat(Path::new("/dev/null")).unwrap().unwrap();

        assert_eq!(stat.kind, NodeKind::CharDevice);
        assert_eq!(stat.rdev, DeviceNumber::new(1, 3));
    }

    #[test]
    fn symlink_is_reported_as_itself() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nvidia0");
        symlink(dir.path().join("missing"), &path).unwrap();

        let stat = HostFs.stat(&path).unwrap().unwrap();

        assert_eq!(stat.kind, NodeKind::Symlink);
    }

    #[test]
    fn symlinked_target_leaves_its_destination_alone() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("secret");
        let path = dir.path().join("nvidia0");
        fs::write(&outside, "").unwrap();
        fs::set_permissions(&outside, Permissions::from_mode(0o600)).unwrap();
        symlink(&outside, &path).unwrap();
        let spec = TargetNodeSpec {
            path: path.clone(),
            device: DeviceNumber::new(1, 3),
            mode: 0o666,
            uid: 0,
            gid: 0,
        };

        // creating the replacement needs CAP_MKNOD, so the result depends on the runner
        let _ = NodeSynchronizer::new(HostFs).reconcile(&spec);

        assert_eq!(fs::metadata(&outside).unwrap().mode() & 0o7777, 0o600);
        assert!(!fs::symlink_metadata(&path).is_ok_and(|m| m.file_type().is_symlink()));
    }

    #[test]
    fn unlink_removes_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nvidia-modeset");
        fs::write(&path, "").unwrap();

        HostFs.unlink(&path).unwrap();

        assert_eq!(HostFs.stat(&path).unwrap(), None);
    }
}
