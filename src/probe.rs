//! Chip identification on the live buses.
//!
//! SDIO is tried once: its chip attribute is available as soon as the card is
//! powered. USB enumeration can lag power-up by hundreds of milliseconds, so
//! it is polled up to [`USB_PROBE_ATTEMPTS`] times, [`USB_PROBE_INTERVAL`]
//! apart (15 s in total).

use log::{debug, info, warn};
use std::time::Duration;

use crate::config::HalConfig;
use crate::error::HalError;
use crate::platform::{Clock, SdioBus, UsbBus, UsbScanError};
use crate::vendor::{VendorDescriptor, VendorRegistry};

/// Maximum USB enumeration attempts.
pub const USB_PROBE_ATTEMPTS: u32 = 300;

/// Wait after an attempt that found nothing.
pub const USB_PROBE_INTERVAL: Duration = Duration::from_millis(50);

/// Resolves the attached chip to a registry entry.
pub struct BusProber<'a> {
    registry: &'a VendorRegistry,
    config: &'a HalConfig,
    sdio: &'a dyn SdioBus,
    usb: &'a dyn UsbBus,
    clock: &'a dyn Clock,
}

impl<'a> BusProber<'a> {
    pub fn new(
        registry: &'a VendorRegistry,
        config: &'a HalConfig,
        sdio: &'a dyn SdioBus,
        usb: &'a dyn UsbBus,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            registry,
            config,
            sdio,
            usb,
            clock,
        }
    }

    /// Identify the attached chip.
    pub fn probe(&self) -> Result<VendorDescriptor, HalError> {
        if let Some(descriptor) = self.probe_sdio() {
            info!("Found SDIO wifi: {}", descriptor.vendor_name);
            return Ok(descriptor);
        }

        for attempt in 1..=USB_PROBE_ATTEMPTS {
            match self.usb.devices() {
                Ok(devices) => {
                    let found = devices
                        .iter()
                        .find_map(|dev| self.registry.lookup_by_usb_id(dev.product_id));
                    if let Some(descriptor) = found {
                        info!(
                            "Found USB wifi: {} (attempt {})",
                            descriptor.vendor_name, attempt
                        );
                        return Ok(descriptor.clone());
                    }
                    debug!(
                        "No known USB wifi among {} devices (attempt {})",
                        devices.len(),
                        attempt
                    );
                }
                Err(UsbScanError::NotReady(msg)) => {
                    debug!("USB not ready (attempt {}): {}", attempt, msg);
                }
                Err(UsbScanError::NoBus) => {
                    warn!("No USB bus present");
                    return Err(HalError::DeviceNotFound);
                }
                Err(UsbScanError::Fatal(msg)) => {
                    warn!("USB enumeration failed: {}", msg);
                    return Err(HalError::ProbeFatal(msg));
                }
            }
            self.clock.sleep(USB_PROBE_INTERVAL);
        }

        warn!(
            "No known wifi chip after {} USB attempts",
            USB_PROBE_ATTEMPTS
        );
        Err(HalError::ProbeTimeout {
            attempts: USB_PROBE_ATTEMPTS,
        })
    }

    /// Single SDIO identification attempt.
    pub fn probe_sdio(&self) -> Option<VendorDescriptor> {
        let Some(device_type) = self.sdio.device_type() else {
            debug!("SDIO device type unavailable, skipping SDIO probe");
            return None;
        };

        let path = self.config.sdio_attr_path(&device_type);
        let attr = match self.sdio.read_attr(&path) {
            Ok(attr) => attr,
            Err(e) => {
                debug!("Open sdio wifi file {:?} failed: {}", path, e);
                return None;
            }
        };

        let found = self.registry.lookup_by_sdio_attr(&attr).cloned();
        if found.is_none() {
            debug!("SDIO attribute {:?} matches no registered chip", attr.trim());
        }
        found
    }
}
