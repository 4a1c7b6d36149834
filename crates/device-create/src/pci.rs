//! PCI enumeration through sysfs.
//!
//! Every PCI function shows up as a directory named after its bus address
//! (`DDDD:BB:DD.F`) holding `vendor`, `device`, `class` and, for display
//! devices, `boot_vga` attributes. The `driver` entry is a symlink to the bound
//! driver and is missing for unbound functions.

use core::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use derive_more::Display;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;
use tracing::warn;

/// Base class code of display controllers.
pub const PCI_CLASS_DISPLAY: u32 = 0x03;

/// Bus address of a PCI function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PciAddress {
    pub domain: u32,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciAddress {
    pub const fn new(domain: u32, bus: u8, device: u8, function: u8) -> Self {
        Self {
            domain,
            bus,
            device,
            function,
        }
    }

    /// X.Org style bus id, e.g. `PCI:1@0:0:0`.
    pub fn bus_id(&self) -> String {
        format!(
            "PCI:{}@{}:{}:{}",
            self.bus, self.domain, self.device, self.function
        )
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

impl FromStr for PciAddress {
    type Err = Report<PciError>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PciError::InvalidAddress {
            address: s.to_string(),
        };

        let (domain, rest) = s.split_once(':').ok_or_else(invalid)?;
        let (bus, rest) = rest.split_once(':').ok_or_else(invalid)?;
        let (device, function) = rest.split_once('.').ok_or_else(invalid)?;

        Ok(Self {
            domain: u32::from_str_radix(domain, 16).change_context_lazy(invalid)?,
            bus: u8::from_str_radix(bus, 16).change_context_lazy(invalid)?,
            device: u8::from_str_radix(device, 16).change_context_lazy(invalid)?,
            function: function.parse::<u8>().change_context_lazy(invalid)?,
        })
    }
}

/// One PCI function as seen during a single enumeration pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciDeviceDescriptor {
    pub address: PciAddress,
    pub vendor_id: u16,
    pub device_id: u16,
    /// 24-bit class code: base class, subclass, programming interface.
    pub class: u32,
    pub boot_vga: bool,
}

impl PciDeviceDescriptor {
    pub fn is_display_controller(&self) -> bool {
        (self.class >> 16) & 0xff == PCI_CLASS_DISPLAY
    }
}

/// Driver binding state of a PCI function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverBinding {
    Unbound,
    /// Bound to the named driver.
    Bound(String),
    /// The binding could not be determined.
    Unreadable,
}

/// Errors that can occur while enumerating the PCI bus.
#[derive(Debug, Display)]
pub enum PciError {
    #[display("PCI bus is not accessible at {path}")]
    BusUnavailable { path: String },
    #[display("Failed to read PCI attribute {path}")]
    AttributeRead { path: String },
    #[display("Failed to parse PCI attribute {path}: {value:?}")]
    AttributeParse { path: String, value: String },
    #[display("Invalid PCI address: {address}")]
    InvalidAddress { address: String },
}

impl Error for PciError {}

/// Source of PCI device descriptors and driver bindings.
pub trait PciBus {
    /// Enumerates all PCI functions in bus address order.
    fn devices(&self) -> Result<Vec<PciDeviceDescriptor>, Report<PciError>>;

    fn driver_binding(&self, address: &PciAddress) -> DriverBinding;
}

/// [`PciBus`] backed by the sysfs device directory.
#[derive(Debug, Clone)]
pub struct SysfsPciBus {
    root: PathBuf,
}

impl SysfsPciBus {
    /// Opens the bus rooted at `root`.
    ///
    /// # Errors
    ///
    /// - [`PciError::BusUnavailable`] if `root` is not a readable directory
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Report<PciError>> {
        let root = root.into();
        let unavailable = || PciError::BusUnavailable {
            path: root.display().to_string(),
        };

        let metadata = fs::metadata(&root).change_context_lazy(unavailable)?;
        if !metadata.is_dir() {
            return Err(Report::new(unavailable()).attach_printable("not a directory"));
        }

        Ok(Self { root })
    }

    fn read_descriptor(
        &self,
        address: PciAddress,
        dir: &Path,
    ) -> Result<PciDeviceDescriptor, Report<PciError>> {
        let vendor_id = read_hex_attribute(&dir.join("vendor"))?;
        let device_id = read_hex_attribute(&dir.join("device"))?;
        let class = read_hex_attribute(&dir.join("class"))?;

        // only VGA-compatible devices expose boot_vga
        let boot_vga = match fs::read_to_string(dir.join("boot_vga")) {
            Ok(value) => value.trim() == "1",
            Err(_) => false,
        };

        Ok(PciDeviceDescriptor {
            address,
            vendor_id: narrow(vendor_id, &dir.join("vendor"))?,
            device_id: narrow(device_id, &dir.join("device"))?,
            class,
            boot_vga,
        })
    }
}

impl PciBus for SysfsPciBus {
    #[tracing::instrument(level = "trace", skip(self), fields(root = %self.root.display()))]
    fn devices(&self) -> Result<Vec<PciDeviceDescriptor>, Report<PciError>> {
        let entries = fs::read_dir(&self.root).change_context_lazy(|| PciError::BusUnavailable {
            path: self.root.display().to_string(),
        })?;

        let mut devices = Vec::new();

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(_) => continue,
            };

            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };

            let address = match name.parse::<PciAddress>() {
                Ok(address) => address,
                Err(_) => {
                    debug!(entry = name, "Skipping non-device sysfs entry");
                    continue;
                }
            };

            match self.read_descriptor(address, &entry.path()) {
                Ok(descriptor) => devices.push(descriptor),
                Err(e) => warn!(%address, error = ?e, "Skipping unreadable PCI device"),
            }
        }

        devices.sort_by_key(|descriptor| descriptor.address);

        debug!(found_devices = devices.len(), "Completed PCI enumeration");
        Ok(devices)
    }

    fn driver_binding(&self, address: &PciAddress) -> DriverBinding {
        let link = self.root.join(address.to_string()).join("driver");

        match fs::symlink_metadata(&link) {
            Ok(metadata) if metadata.file_type().is_symlink() => {}
            Ok(_) => return DriverBinding::Unbound,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return DriverBinding::Unbound,
            Err(e) => {
                warn!(path = %link.display(), error = %e, "Can't access driver link");
                return DriverBinding::Unreadable;
            }
        }

        match fs::read_link(&link) {
            Ok(target) => {
                let name = target
                    .file_name()
                    .unwrap_or(target.as_os_str())
                    .to_string_lossy()
                    .into_owned();
                DriverBinding::Bound(name)
            }
            Err(e) => {
                warn!(path = %link.display(), error = %e, "Can't resolve driver link");
                DriverBinding::Unreadable
            }
        }
    }
}

fn read_hex_attribute(path: &Path) -> Result<u32, Report<PciError>> {
    let raw = fs::read_to_string(path).change_context_lazy(|| PciError::AttributeRead {
        path: path.display().to_string(),
    })?;
    let value = raw.trim();
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);

    u32::from_str_radix(digits, 16).change_context_lazy(|| PciError::AttributeParse {
        path: path.display().to_string(),
        value: value.to_string(),
    })
}

fn narrow(value: u32, path: &Path) -> Result<u16, Report<PciError>> {
    u16::try_from(value).change_context_lazy(|| PciError::AttributeParse {
        path: path.display().to_string(),
        value: format!("{value:#x}"),
    })
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use similar_asserts::assert_eq;

    use super::*;

    fn add_device(root: &Path, address: &str, vendor: &str, class: &str) -> PathBuf {
        let dir = root.join(address);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("vendor"), format!("{vendor}\n")).unwrap();
        fs::write(dir.join("device"), "0x2330\n").unwrap();
        fs::write(dir.join("class"), format!("{class}\n")).unwrap();
        dir
    }

    #[test]
    fn address_round_trips_through_sysfs_name() {
        let address: PciAddress = "0000:3b:00.1".parse().unwrap();

        assert_eq!(address, PciAddress::new(0, 0x3b, 0, 1));
        assert_eq!(address.to_string(), "0000:3b:00.1");
        assert_eq!(address.bus_id(), "PCI:59@0:0:1");
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        for name in ["", "0000:3b", "0000:3b:00", "0000:zz:00.0", "pci0000:00"] {
            assert!(name.parse::<PciAddress>().is_err(), "{name} should not parse");
        }
    }

    #[test]
    fn display_class_is_detected_from_base_class() {
        let mut descriptor = PciDeviceDescriptor {
            address: PciAddress::new(0, 1, 0, 0),
            vendor_id: 0x10de,
            device_id: 0x2330,
            class: 0x030000,
            boot_vga: false,
        };
        assert!(descriptor.is_display_controller());

        descriptor.class = 0x030200;
        assert!(descriptor.is_display_controller());

        descriptor.class = 0x040300;
        assert!(!descriptor.is_display_controller());
    }

    #[test]
    fn enumeration_reads_attributes_in_address_order() {
        let root = tempfile::tempdir().unwrap();
        let gpu = add_device(root.path(), "0000:41:00.0", "0x10de", "0x030200");
        fs::write(gpu.join("boot_vga"), "1\n").unwrap();
        add_device(root.path(), "0000:00:02.0", "0x8086", "0x030000");
        fs::create_dir(root.path().join("not-a-device")).unwrap();

        let bus = SysfsPciBus::open(root.path()).unwrap();
        let devices = bus.devices().unwrap();

        assert_eq!(
            devices,
            vec![
                PciDeviceDescriptor {
                    address: PciAddress::new(0, 0, 2, 0),
                    vendor_id: 0x8086,
                    device_id: 0x2330,
                    class: 0x030000,
                    boot_vga: false,
                },
                PciDeviceDescriptor {
                    address: PciAddress::new(0, 0x41, 0, 0),
                    vendor_id: 0x10de,
                    device_id: 0x2330,
                    class: 0x030200,
                    boot_vga: true,
                },
            ]
        );
    }

    #[test]
    fn devices_with_broken_attributes_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        add_device(root.path(), "0000:01:00.0", "garbage", "0x030000");
        let dir = root.path().join("0000:02:00.0");
        fs::create_dir(&dir).unwrap();

        let bus = SysfsPciBus::open(root.path()).unwrap();

        assert!(bus.devices().unwrap().is_empty());
    }

    #[test]
    fn missing_root_is_unavailable() {
        let root = tempfile::tempdir().unwrap();
        let err = SysfsPciBus::open(root.path().join("absent")).unwrap_err();

        assert!(matches!(
            err.current_context(),
            PciError::BusUnavailable { .. }
        ));
    }

    #[test]
    fn driver_binding_follows_the_driver_link() {
        let root = tempfile::tempdir().unwrap();
        let bound = add_device(root.path(), "0000:01:00.0", "0x10de", "0x030000");
        symlink("../../../bus/pci/drivers/nvidia", bound.join("driver")).unwrap();
        let stub = add_device(root.path(), "0000:02:00.0", "0x10de", "0x030000");
        symlink("../../../bus/pci/drivers/pci-stub", stub.join("driver")).unwrap();
        add_device(root.path(), "0000:03:00.0", "0x10de", "0x030000");

        let bus = SysfsPciBus::open(root.path()).unwrap();

        assert_eq!(
            bus.driver_binding(&PciAddress::new(0, 1, 0, 0)),
            DriverBinding::Bound("nvidia".to_string())
        );
        assert_eq!(
            bus.driver_binding(&PciAddress::new(0, 2, 0, 0)),
            DriverBinding::Bound("pci-stub".to_string())
        );
        assert_eq!(
            bus.driver_binding(&PciAddress::new(0, 3, 0, 0)),
            DriverBinding::Unbound
        );
    }

    #[test]
    fn regular_file_is_not_a_binding() {
        let root = tempfile::tempdir().unwrap();
        let dir = add_device(root.path(), "0000:01:00.0", "0x10de", "0x030000");
        fs::write(dir.join("driver"), "nvidia").unwrap();

        let bus = SysfsPciBus::open(root.path()).unwrap();

        assert_eq!(
            bus.driver_binding(&PciAddress::new(0, 1, 0, 0)),
            DriverBinding::Unbound
        );
    }
}
