//! Firmware path selection and runtime override.

use log::{debug, info, warn};
use std::io;
use std::path::Path;
use std::time::Duration;

use crate::config::DriverProfile;
use crate::context::HalContext;
use crate::error::HalError;
use crate::loader::ModuleLoader;
use crate::vendor::{ApModeSwitch, FirmwareMode, VendorFirmware};

/// Wait between removing the default module and loading the AP module.
pub const AP_SWITCH_SETTLE: Duration = Duration::from_millis(100);

/// Picks firmware images for the active vendor.
pub struct FirmwarePathResolver<'a> {
    ctx: &'a HalContext,
}

impl<'a> FirmwarePathResolver<'a> {
    pub fn new(ctx: &'a HalContext) -> Self {
        Self { ctx }
    }

    /// Firmware image for `mode`.
    ///
    /// For a vendor with an AP-mode module swap, asking for [`FirmwareMode::Ap`]
    /// performs the swap before the path is returned.
    pub fn resolve_path(&self, mode: FirmwareMode) -> Result<String, HalError> {
        let ctx = self.ctx;
        match &ctx.config.profile {
            DriverProfile::Fixed(fixed) => fixed
                .firmware
                .get(mode)
                .map(str::to_string)
                .ok_or_else(|| no_path_for(mode)),
            DriverProfile::MultiVendor => {
                let (vendor, firmware) = self.classify()?;
                debug!("Resolving {} firmware for {}", mode, vendor);
                match firmware {
                    VendorFirmware::Default => ctx
                        .config
                        .default_firmware
                        .get(mode)
                        .map(str::to_string)
                        .ok_or_else(|| no_path_for(mode)),
                    VendorFirmware::Named {
                        table,
                        ap_switch,
                        ..
                    } => {
                        if let (FirmwareMode::Ap, Some(switch)) = (mode, ap_switch) {
                            self.switch_to_ap_mode(&switch)?;
                        }
                        Ok(table.path(mode).to_string())
                    }
                }
            }
        }
    }

    /// Replace the default module with the AP-capable one.
    pub fn switch_to_ap_mode(&self, switch: &ApModeSwitch) -> Result<(), HalError> {
        let platform = &self.ctx.platform;
        let loader = ModuleLoader::new(
            platform.modules.as_ref(),
            platform.props.as_ref(),
            platform.clock.as_ref(),
        );

        // The default module may already be gone
        if let Err(e) = loader.unload(switch.unload_module) {
            warn!("Unable to remove {}: {}", switch.unload_module, e);
        }
        platform.clock.sleep(AP_SWITCH_SETTLE);
        loader.load(Path::new(switch.load_path), switch.load_args)?;
        info!("Switched to AP module {}", switch.load_path);
        Ok(())
    }

    /// Point the driver at a different firmware image.
    pub fn write_override_path(&self, path: Option<&str>) -> Result<(), HalError> {
        let Some(path) = path else {
            return Ok(());
        };
        let ctx = self.ctx;

        if ctx.config.profile.is_multi_vendor() {
            if let Some(vendor) = ctx.store.get() {
                if let Some(firmware) = ctx.catalog.lookup(&vendor) {
                    if !firmware.accepts_override() {
                        debug!("{} ignores firmware path overrides", vendor);
                        return Ok(());
                    }
                }
            }
        }

        let Some(param) = &ctx.config.fw_path_param else {
            return Err(HalError::FirmwareOverrideIoError(io::Error::new(
                io::ErrorKind::NotFound,
                "no firmware path parameter configured",
            )));
        };

        let mut value = path.as_bytes().to_vec();
        value.push(0);
        ctx.platform
            .params
            .write_param(param, &value)
            .map_err(|e| {
                warn!("Failed to write fw path param {:?}: {}", param, e);
                HalError::FirmwareOverrideIoError(e)
            })?;
        info!("Firmware path set to {}", path);
        Ok(())
    }

    fn classify(&self) -> Result<(String, VendorFirmware), HalError> {
        let Some(vendor) = self.ctx.store.get() else {
            warn!("No vendor identified yet");
            return Err(HalError::UnknownVendor(None));
        };
        match self.ctx.catalog.lookup(&vendor) {
            Some(firmware) => Ok((vendor, *firmware)),
            None => {
                warn!("No firmware known for vendor {}", vendor);
                Err(HalError::UnknownVendor(Some(vendor)))
            }
        }
    }
}

fn no_path_for(mode: FirmwareMode) -> HalError {
    HalError::UnknownMode(format!("no {} firmware configured", mode))
}
