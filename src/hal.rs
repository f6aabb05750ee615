//! Process-facing HAL handle and integer boundary.
//!
//! [`WifiHal`] owns the configuration, platform backends, vendor slot and
//! lifecycle state. Its methods return [`HalError`]; the free functions at the
//! bottom of this module flatten those into the integer convention callers
//! expect (0 on success, [`HalError::code`] on failure).
//!
//! # Example
//!
//! ```no_run
//! use wifi_driver_hal::{hal, HalConfig, WifiHal};
//!
//! let mut wifi = WifiHal::host(HalConfig::from_env()?);
//! if hal::load_driver(&mut wifi) == 0 {
//!     let ap_fw = hal::get_fw_path(&mut wifi, 1);
//!     println!("AP firmware: {:?}", ap_fw);
//! }
//! # Ok::<(), wifi_driver_hal::config::ConfigError>(())
//! ```

use log::{debug, warn};

use crate::config::HalConfig;
use crate::context::HalContext;
use crate::error::HalError;
use crate::fw_path::FirmwarePathResolver;
use crate::lifecycle::{DriverController, LifecycleState};
use crate::platform::Platform;
use crate::probe::BusProber;
use crate::state::VendorStateStore;
use crate::vendor::{FirmwareMode, VendorDescriptor};

/// One Wi-Fi driver HAL instance.
#[derive(Debug)]
pub struct WifiHal {
    ctx: HalContext,
    state: LifecycleState,
}

impl WifiHal {
    pub fn new(config: HalConfig, platform: Platform, store: Box<dyn VendorStateStore>) -> Self {
        Self::from_context(HalContext::new(config, platform, store))
    }

    /// HAL driving the local system.
    pub fn host(config: HalConfig) -> Self {
        Self::from_context(HalContext::host(config))
    }

    pub fn from_context(ctx: HalContext) -> Self {
        Self {
            ctx,
            state: LifecycleState::Unloaded,
        }
    }

    pub fn context(&self) -> &HalContext {
        &self.ctx
    }

    pub fn config(&self) -> &HalConfig {
        &self.ctx.config
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Vendor recorded by the last successful probe.
    pub fn current_vendor(&self) -> Option<String> {
        self.ctx.store.get()
    }

    /// Identify the chip and load its driver.
    pub fn load_driver(&mut self) -> Result<(), HalError> {
        DriverController::new(&self.ctx, &mut self.state).load_driver()
    }

    /// Remove the driver and power the radio down.
    pub fn unload_driver(&mut self) -> Result<(), HalError> {
        DriverController::new(&self.ctx, &mut self.state).unload_driver()
    }

    /// Identify the attached chip without loading anything.
    pub fn probe(&self) -> Result<VendorDescriptor, HalError> {
        let ctx = &self.ctx;
        BusProber::new(
            &ctx.registry,
            &ctx.config,
            ctx.platform.sdio.as_ref(),
            ctx.platform.usb.as_ref(),
            ctx.platform.clock.as_ref(),
        )
        .probe()
    }

    /// Firmware image for `mode`, swapping modules first where required.
    pub fn fw_path(&mut self, mode: FirmwareMode) -> Result<String, HalError> {
        FirmwarePathResolver::new(&self.ctx).resolve_path(mode)
    }

    /// Point the driver at a different firmware image.
    pub fn change_fw_path(&mut self, path: Option<&str>) -> Result<(), HalError> {
        FirmwarePathResolver::new(&self.ctx).write_override_path(path)
    }
}

fn status(op: &str, result: Result<(), HalError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            warn!("{} failed: {}", op, e);
            e.code()
        }
    }
}

/// Load the driver; 0 or a negative error code.
pub fn load_driver(hal: &mut WifiHal) -> i32 {
    status("load_driver", hal.load_driver())
}

/// Unload the driver; 0 or a negative error code.
pub fn unload_driver(hal: &mut WifiHal) -> i32 {
    status("unload_driver", hal.unload_driver())
}

/// Firmware path for raw `mode` (0 = STA, 1 = AP, 2 = P2P).
pub fn get_fw_path(hal: &mut WifiHal, mode: i32) -> Option<String> {
    let result = FirmwareMode::from_raw(mode).and_then(|mode| hal.fw_path(mode));
    match result {
        Ok(path) => {
            debug!("get_fw_path({}) = {}", mode, path);
            Some(path)
        }
        Err(e) => {
            warn!("get_fw_path({}) failed: {}", mode, e);
            None
        }
    }
}

/// Override the firmware path; 0 or a negative error code.
pub fn change_fw_path(hal: &mut WifiHal, path: Option<&str>) -> i32 {
    status("change_fw_path", hal.change_fw_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{sim_platform, Event, SimHandles, UsbScript};
    use crate::state::MemoryVendorStore;

    fn wifi() -> (WifiHal, SimHandles) {
        let (platform, sim) = sim_platform();
        let hal = WifiHal::new(
            HalConfig::default(),
            platform,
            Box::new(MemoryVendorStore::new()),
        );
        (hal, sim)
    }

    #[test]
    fn test_load_then_fw_path() {
        let (mut hal, sim) = wifi();
        sim.set_usb(vec![UsbScript::Devices(vec![0xb82c])]);

        assert_eq!(load_driver(&mut hal), 0);
        assert_eq!(hal.state(), LifecycleState::Loaded);
        assert_eq!(hal.current_vendor().as_deref(), Some("rtl8822bu"));
        assert_eq!(get_fw_path(&mut hal, 0).as_deref(), Some("STA"));
        assert_eq!(get_fw_path(&mut hal, 2).as_deref(), Some("P2P"));

        assert_eq!(unload_driver(&mut hal), 0);
        assert_eq!(hal.state(), LifecycleState::Unloaded);
    }

    #[test]
    fn test_error_codes() {
        let (mut hal, sim) = wifi();
        sim.set_usb(vec![UsbScript::NoBus]);
        assert_eq!(load_driver(&mut hal), HalError::DeviceNotFound.code());

        sim.set_usb(vec![UsbScript::Fatal]);
        assert_eq!(load_driver(&mut hal), -3);

        // Nothing identified yet
        assert_eq!(unload_driver(&mut hal), -9);
    }

    #[test]
    fn test_get_fw_path_bad_mode() {
        let (mut hal, _sim) = wifi();
        hal.context().store.set("bcm6212").unwrap();
        assert!(get_fw_path(&mut hal, 3).is_none());
        assert!(get_fw_path(&mut hal, -1).is_none());
        assert!(get_fw_path(&mut hal, 1).is_some());
    }

    #[test]
    fn test_change_fw_path_codes() {
        let (mut hal, sim) = wifi();
        hal.context().store.set("bcm6335").unwrap();
        assert_eq!(change_fw_path(&mut hal, None), 0);
        assert_eq!(change_fw_path(&mut hal, Some("/fw.bin")), -11);

        sim.allow_param("/sys/module/dhd/parameters/firmware_path");
        assert_eq!(change_fw_path(&mut hal, Some("/fw.bin")), 0);
        assert_eq!(
            sim.journal.count(|e| matches!(e, Event::WriteParam { .. })),
            1
        );
    }

    #[test]
    fn test_probe_does_not_touch_power_or_state() {
        let (hal, sim) = wifi();
        sim.set_usb(vec![UsbScript::Devices(vec![0xbd27])]);

        let d = hal.probe().unwrap();
        assert_eq!(d.helper_service.as_deref(), Some("bcmdl"));
        assert!(hal.current_vendor().is_none());
        assert_eq!(sim.journal.actions(), Vec::<Event>::new());
    }
}
