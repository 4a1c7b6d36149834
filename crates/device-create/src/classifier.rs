//! Picks the PCI functions that need device nodes.
//!
//! A function qualifies when it is a display controller from the target
//! vendor, is bound to a kernel driver, and that driver is not a passthrough
//! stub holding the device for a virtual machine.

use tracing::debug;
use tracing::info;

use crate::pci::DriverBinding;
use crate::pci::PciBus;
use crate::pci::PciDeviceDescriptor;

pub const NVIDIA_VENDOR_ID: u16 = 0x10de;

/// Drivers that reserve a device for passthrough.
pub const PASSTHROUGH_DRIVERS: [&str; 2] = ["pci-stub", "pciback"];

/// Why a descriptor was or was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    NotDisplay,
    ForeignVendor,
    Unbound,
    Passthrough(String),
    /// The driver link exists but could not be read.
    Unreadable,
}

pub struct Classifier<'a, B: PciBus + ?Sized> {
    bus: &'a B,
    vendor_id: u16,
}

impl<'a, B: PciBus + ?Sized> Classifier<'a, B> {
    pub fn new(bus: &'a B) -> Self {
        Self::for_vendor(bus, NVIDIA_VENDOR_ID)
    }

    pub fn for_vendor(bus: &'a B, vendor_id: u16) -> Self {
        Self { bus, vendor_id }
    }

    pub fn classify(&self, descriptor: &PciDeviceDescriptor) -> Verdict {
        if !descriptor.is_display_controller() {
            return Verdict::NotDisplay;
        }

        if descriptor.vendor_id != self.vendor_id {
            return Verdict::ForeignVendor;
        }

        match self.bus.driver_binding(&descriptor.address) {
            DriverBinding::Unbound => Verdict::Unbound,
            DriverBinding::Unreadable => Verdict::Unreadable,
            DriverBinding::Bound(driver) if PASSTHROUGH_DRIVERS.contains(&driver.as_str()) => {
                Verdict::Passthrough(driver)
            }
            DriverBinding::Bound(_) => Verdict::Accepted,
        }
    }

    /// Counts accepted descriptors, in enumeration order.
    ///
    /// Node indices are handed out by this count, not by bus address.
    pub fn count_candidates(&self, descriptors: &[PciDeviceDescriptor]) -> usize {
        let mut candidates = 0;

        for descriptor in descriptors {
            let verdict = self.classify(descriptor);
            if verdict != Verdict::NotDisplay {
                info!(
                    "Vendor/Device Id: {:x}:{:x}",
                    descriptor.vendor_id, descriptor.device_id
                );
                info!("BusID \"{}\"", descriptor.address.bus_id());
                debug!(
                    "Is boot vga? {}",
                    if descriptor.boot_vga { "yes" } else { "no" }
                );
            }

            match verdict {
                Verdict::NotDisplay => {}
                Verdict::Accepted => candidates += 1,
                Verdict::ForeignVendor => info!("The device is not NVIDIA. Skipping..."),
                Verdict::Unbound => info!("The device is not bound to any driver."),
                Verdict::Passthrough(driver) => {
                    info!(%driver, "The device is a pci passthrough. Skipping...")
                }
                Verdict::Unreadable => info!("The device driver can't be resolved. Skipping..."),
            }
        }

        candidates
    }
}
