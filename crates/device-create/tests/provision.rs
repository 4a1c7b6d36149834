use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;
use std::path::PathBuf;

use device_create::app::Provisioner;
use device_create::app::RunOutcome;
use device_create::app::RunReport;
use device_create::config::Config;
use device_create::config::SystemPaths;
use device_create::node::memory::FsOp;
use device_create::node::DeviceNumber;
use device_create::node::MemoryFs;
use device_create::node::NodeKind;
use device_create::node::NodeStat;
use similar_asserts::assert_eq;
use tempfile::TempDir;
use test_log::test;
use utils::logging::LogTarget;

const MODULES: &str = "\
nvidia_modeset 1314816 3 nvidia_drm, Live 0x0000000000000000
nvidia_uvm 1540096 0 - Live 0x0000000000000000
nvidia 56868864 42 nvidia_uvm,nvidia_modeset, Live 0x0000000000000000 (POE)
";

const DEVICES: &str = "\
Character devices:
  1 mem
  4 /dev/vc/0
195 nvidia-frontend
236 nvidia-nvlink
508 nvidia-uvm

Block devices:
  7 loop
";

fn host() -> (TempDir, Config) {
    let root = tempfile::tempdir().unwrap();
    let sysfs = root.path().join("sys/bus/pci/devices");
    fs::create_dir_all(&sysfs).unwrap();
    fs::write(root.path().join("modules"), MODULES).unwrap();
    fs::write(root.path().join("devices"), DEVICES).unwrap();

    let config = Config {
        dry_run: false,
        log_target: LogTarget::Discard,
        paths: SystemPaths {
            proc_modules: root.path().join("modules"),
            proc_devices: root.path().join("devices"),
            sysfs_pci: sysfs,
            dev_root: PathBuf::from("/dev"),
            driver_version: root.path().join("missing-version"),
        },
    };
    (root, config)
}

fn add_function(sysfs: &Path, address: &str, vendor: u16, class: u32, driver: Option<&str>) {
    let dir = sysfs.join(address);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("vendor"), format!("0x{vendor:04x}\n")).unwrap();
    fs::write(dir.join("device"), "0x20b0\n").unwrap();
    fs::write(dir.join("class"), format!("0x{class:06x}\n")).unwrap();
    if let Some(driver) = driver {
        symlink(format!("../../../../bus/pci/drivers/{driver}"), dir.join("driver")).unwrap();
    }
}

fn char_device(major: u32, minor: u32, mode: u32, uid: u32) -> NodeStat {
    NodeStat {
        kind: NodeKind::CharDevice,
        rdev: DeviceNumber::new(major, minor),
        mode,
        uid,
        gid: 0,
    }
}

#[test]
fn mixed_host_gets_one_node_per_eligible_gpu() {
    let (_root, config) = host();
    let sysfs = &config.paths.sysfs_pci;
    add_function(sysfs, "0000:07:00.0", 0x10de, 0x030200, Some("nvidia"));
    add_function(sysfs, "0000:07:00.1", 0x10de, 0x040300, Some("snd_hda_intel"));
    add_function(sysfs, "0000:0a:00.0", 0x10de, 0x030000, Some("vfio-pci"));
    add_function(sysfs, "0000:0b:00.0", 0x10de, 0x030200, Some("pciback"));
    add_function(sysfs, "0000:0c:00.0", 0x10de, 0x030200, None);
    add_function(sysfs, "0000:00:02.0", 0x8086, 0x030000, Some("i915"));
    let fs = MemoryFs::new().with_umask(0o022);

    let outcome = Provisioner::new(&config).run(&fs).unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Completed(RunReport {
            created: 6,
            ..RunReport::default()
        })
    );
    assert_eq!(fs.get("/dev/nvidia0"), Some(char_device(195, 0, 0o666, 0)));
    assert_eq!(fs.get("/dev/nvidia1"), Some(char_device(195, 1, 0o666, 0)));
    assert_eq!(fs.get("/dev/nvidia2"), None);
    assert_eq!(fs.get("/dev/nvidiactl"), Some(char_device(195, 255, 0o666, 0)));
    assert_eq!(fs.get("/dev/nvidia-uvm"), Some(char_device(508, 0, 0o666, 0)));
    assert_eq!(fs.get("/dev/nvidia-uvm-tools"), Some(char_device(508, 1, 0o666, 0)));
    assert_eq!(fs.get("/dev/nvidia-modeset"), Some(char_device(195, 254, 0o666, 0)));
}

#[test]
fn stale_nodes_are_repaired() {
    let (_root, config) = host();
    add_function(&config.paths.sysfs_pci, "0000:07:00.0", 0x10de, 0x030000, Some("nvidia"));
    let fs = MemoryFs::new();
    fs.insert("/dev/nvidiactl", char_device(195, 255, 0o600, 1000));
    fs.insert("/dev/nvidia0", char_device(195, 7, 0o666, 0));
    fs.insert(
        "/dev/nvidia-uvm",
        NodeStat {
            kind: NodeKind::File,
            rdev: DeviceNumber::new(0, 0),
            mode: 0o644,
            uid: 0,
            gid: 0,
        },
    );
    fs.insert("/dev/nvidia-uvm-tools", char_device(508, 1, 0o666, 0));

    let outcome = Provisioner::new(&config).run(&fs).unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Completed(RunReport {
            unchanged: 1,
            created: 1,
            fixed: 3,
            failed: Vec::new(),
        })
    );
    assert_eq!(fs.get("/dev/nvidiactl"), Some(char_device(195, 255, 0o666, 0)));
    assert_eq!(fs.get("/dev/nvidia0"), Some(char_device(195, 0, 0o666, 0)));
    assert_eq!(fs.get("/dev/nvidia-uvm"), Some(char_device(508, 0, 0o666, 0)));
}

#[test]
fn run_converges_after_a_transient_failure() {
    let (_root, config) = host();
    add_function(&config.paths.sysfs_pci, "0000:07:00.0", 0x10de, 0x030000, Some("nvidia"));
    let fs = MemoryFs::new();
    let provisioner = Provisioner::new(&config);

    fs.fail(FsOp::Mknod);
    let first = provisioner.run(&fs).unwrap();
    fs.heal(FsOp::Mknod);
    let second = provisioner.run(&fs).unwrap();
    let third = provisioner.run(&fs).unwrap();

    assert_eq!(first.exit_code(), std::process::ExitCode::FAILURE);
    assert_eq!(
        second,
        RunOutcome::Completed(RunReport {
            created: 5,
            ..RunReport::default()
        })
    );
    assert_eq!(
        third,
        RunOutcome::Completed(RunReport {
            unchanged: 5,
            ..RunReport::default()
        })
    );
}

#[test]
fn too_many_gpus_are_capped() {
    let (_root, mut config) = host();
    fs::write(&config.paths.proc_modules, "nvidia 56868864 0 - Live 0x0\n").unwrap();
    for bus in 0..=255u32 {
        let address = format!("0000:{bus:02x}:00.0");
        add_function(&config.paths.sysfs_pci, &address, 0x10de, 0x030000, Some("nvidia"));
    }
    config.dry_run = true;

    let outcome = Provisioner::new(&config).run(MemoryFs::new()).unwrap();

    assert_eq!(outcome, RunOutcome::DryRun { planned: 201 });
}
