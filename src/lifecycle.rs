//! Driver load/unload sequencing.
//!
//! Multi-vendor:
//!
//! ```text
//! Unloaded -> PoweringUp -> Probing -> Loading -> Loaded
//! Loaded -> Unloading -> PoweringDown -> Unloaded
//! ```
//!
//! Fixed-vendor skips the power and probe states and short-circuits when the
//! driver is already in the requested state. A failed load returns the
//! machine to `Unloaded`, after powering down in multi-vendor mode.

use log::{debug, info, warn};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::config::{DriverProfile, FixedDriver};
use crate::context::HalContext;
use crate::error::HalError;
use crate::loader::{LoadedCheck, ModuleLoader, STATUS_OK, STATUS_UNLOADED};
use crate::probe::BusProber;
use crate::vendor::VendorDescriptor;

/// Wait before tearing the driver down.
pub const TEARDOWN_GRACE: Duration = Duration::from_millis(200);

/// Loaded-check polls after a successful unload.
pub const CONFIRM_POLLS: u32 = 20;

/// Wait between loaded-check polls.
pub const CONFIRM_INTERVAL: Duration = Duration::from_millis(500);

/// Wait for the card to detach once the module is gone.
pub const CARD_REMOVAL_GRACE: Duration = Duration::from_millis(500);

/// Wait after requesting a helper service start.
pub const HELPER_START_GRACE: Duration = Duration::from_millis(500);

/// Property that starts a named service.
pub const CTL_START: &str = "ctl.start";

/// Property that stops a named service.
pub const CTL_STOP: &str = "ctl.stop";

/// Where the driver is in its load/unload cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Unloaded,
    PoweringUp,
    Probing,
    Loading,
    Loaded,
    Unloading,
    PoweringDown,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unloaded => "unloaded",
            Self::PoweringUp => "powering-up",
            Self::Probing => "probing",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Unloading => "unloading",
            Self::PoweringDown => "powering-down",
        };
        write!(f, "{}", name)
    }
}

/// Runs load and unload sequences against a [`HalContext`].
pub struct DriverController<'a> {
    ctx: &'a HalContext,
    state: &'a mut LifecycleState,
}

impl<'a> DriverController<'a> {
    pub fn new(ctx: &'a HalContext, state: &'a mut LifecycleState) -> Self {
        Self { ctx, state }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state
    }

    /// Bring the driver up.
    pub fn load_driver(&mut self) -> Result<(), HalError> {
        let ctx = self.ctx;
        match &ctx.config.profile {
            DriverProfile::MultiVendor => self.load_multi_vendor(),
            DriverProfile::Fixed(fixed) => self.load_fixed(fixed),
        }
    }

    /// Take the driver down.
    pub fn unload_driver(&mut self) -> Result<(), HalError> {
        let ctx = self.ctx;
        match &ctx.config.profile {
            DriverProfile::MultiVendor => self.unload_multi_vendor(),
            DriverProfile::Fixed(fixed) => self.unload_fixed(fixed),
        }
    }

    fn load_multi_vendor(&mut self) -> Result<(), HalError> {
        let ctx = self.ctx;
        let domain = ctx.config.power_domain;

        self.transition(LifecycleState::PoweringUp);
        if let Err(e) = ctx.platform.power.power_up(domain) {
            warn!("Power up of {} failed: {}", domain, e);
        }

        match self.probe_and_load() {
            Ok(descriptor) => {
                self.set_status(STATUS_OK);
                self.transition(LifecycleState::Loaded);
                info!("Driver loaded for {}", descriptor.vendor_name);
                Ok(())
            }
            Err(e) => {
                warn!("Driver load failed: {}", e);
                self.power_down();
                self.transition(LifecycleState::Unloaded);
                Err(e)
            }
        }
    }

    fn probe_and_load(&mut self) -> Result<VendorDescriptor, HalError> {
        let ctx = self.ctx;
        let platform = &ctx.platform;

        self.transition(LifecycleState::Probing);
        let descriptor = BusProber::new(
            &ctx.registry,
            &ctx.config,
            platform.sdio.as_ref(),
            platform.usb.as_ref(),
            platform.clock.as_ref(),
        )
        .probe()?;

        if let Err(e) = ctx.store.set(&descriptor.vendor_name) {
            warn!("Failed to persist vendor {}: {}", descriptor.vendor_name, e);
        }

        let helper_started = self.start_helper(&descriptor);

        self.transition(LifecycleState::Loading);
        let loaded = self
            .loader()
            .load(Path::new(&descriptor.module_path), &descriptor.module_args);
        if let Err(e) = loaded {
            if helper_started {
                self.stop_helper(&descriptor);
            }
            return Err(e);
        }
        Ok(descriptor)
    }

    fn load_fixed(&mut self, fixed: &'a FixedDriver) -> Result<(), HalError> {
        let loader = self.loader();
        if loader.is_loaded(fixed_check(self.ctx, fixed)) {
            debug!("Driver already loaded");
            self.transition(LifecycleState::Loaded);
            return Ok(());
        }

        self.transition(LifecycleState::Loading);
        if let Some(module) = &fixed.module {
            if let Err(e) = loader.load(&module.path, &module.args) {
                self.transition(LifecycleState::Unloaded);
                return Err(e);
            }
        }
        if let Some(param) = &fixed.state_ctrl_param {
            if let Err(e) = self.write_state_ctrl(param, &fixed.state_on) {
                self.transition(LifecycleState::Unloaded);
                return Err(e);
            }
        }

        self.set_status(STATUS_OK);
        self.transition(LifecycleState::Loaded);
        info!("Driver loaded");
        Ok(())
    }

    fn unload_fixed(&mut self, fixed: &'a FixedDriver) -> Result<(), HalError> {
        let check = fixed_check(self.ctx, fixed);
        if !self.loader().is_loaded(check) {
            debug!("Driver not loaded, nothing to unload");
            self.transition(LifecycleState::Unloaded);
            return Ok(());
        }

        self.transition(LifecycleState::Unloading);
        if fixed.module.is_some() || fixed.state_ctrl_param.is_some() {
            self.ctx.platform.clock.sleep(TEARDOWN_GRACE);
        }

        let result = match (&fixed.module, &fixed.state_ctrl_param) {
            (Some(module), _) => self.remove_and_confirm(&module.name, check),
            (None, Some(param)) => self.write_state_ctrl(param, &fixed.state_off),
            // Built-in driver without state control
            (None, None) => Ok(()),
        };

        match result {
            Ok(()) => {
                self.set_status(STATUS_UNLOADED);
                self.transition(LifecycleState::Unloaded);
                info!("Driver unloaded");
                Ok(())
            }
            Err(e) => {
                warn!("Driver unload failed: {}", e);
                self.transition(LifecycleState::Loaded);
                Err(e)
            }
        }
    }

    fn unload_multi_vendor(&mut self) -> Result<(), HalError> {
        let ctx = self.ctx;

        self.transition(LifecycleState::Unloading);
        ctx.platform.clock.sleep(TEARDOWN_GRACE);

        let vendor = ctx.store.get();
        let descriptor = vendor
            .as_deref()
            .and_then(|name| ctx.registry.lookup_by_vendor_name(name));

        let result = match descriptor {
            Some(descriptor) => {
                let name = descriptor.module_name.as_str();
                let check = LoadedCheck::ModuleListed(name);
                let removed = if self.loader().may_be_listed(name) {
                    self.remove_and_confirm(name, check)
                } else {
                    debug!("Module {} not loaded, skipping removal", name);
                    Ok(())
                };
                self.stop_helper(descriptor);
                removed
            }
            None => {
                warn!("No driver known for stored vendor {:?}", vendor);
                Err(HalError::UnknownVendor(vendor))
            }
        };

        if result.is_ok() {
            self.set_status(STATUS_UNLOADED);
        }
        self.power_down();
        self.transition(LifecycleState::Unloaded);
        match &result {
            Ok(()) => info!("Driver unloaded"),
            Err(e) => warn!("Driver unload failed: {}", e),
        }
        result
    }

    /// Unload `name` and wait for `check` to report it gone.
    fn remove_and_confirm(&self, name: &str, check: LoadedCheck<'_>) -> Result<(), HalError> {
        let loader = self.loader();
        let clock = self.ctx.platform.clock.as_ref();

        loader.unload(name)?;

        let mut cleared = false;
        for _ in 0..CONFIRM_POLLS {
            if !loader.is_loaded(check) {
                cleared = true;
                break;
            }
            clock.sleep(CONFIRM_INTERVAL);
        }
        clock.sleep(CARD_REMOVAL_GRACE);

        if cleared {
            Ok(())
        } else {
            warn!("Module {} still reported loaded after unload", name);
            Err(HalError::UnloadConfirmationTimeout {
                module: name.to_string(),
            })
        }
    }

    fn write_state_ctrl(&self, param: &Path, value: &str) -> Result<(), HalError> {
        let mut bytes = value.as_bytes().to_vec();
        bytes.push(0);
        self.ctx
            .platform
            .params
            .write_param(param, &bytes)
            .map_err(|e| {
                warn!("Failed to write {:?}: {}", param, e);
                HalError::StateControlIoError(e)
            })
    }

    /// Request the descriptor's helper service; returns whether one was asked for.
    fn start_helper(&self, descriptor: &VendorDescriptor) -> bool {
        let Some(service) = &descriptor.helper_service else {
            return false;
        };
        debug!("Starting helper service {}", service);
        if let Err(e) = self.ctx.platform.props.set(CTL_START, service) {
            warn!("Failed to start {}: {}", service, e);
        }
        self.ctx.platform.clock.sleep(HELPER_START_GRACE);
        true
    }

    fn stop_helper(&self, descriptor: &VendorDescriptor) {
        if let Some(service) = &descriptor.helper_service {
            debug!("Stopping helper service {}", service);
            if let Err(e) = self.ctx.platform.props.set(CTL_STOP, service) {
                warn!("Failed to stop {}: {}", service, e);
            }
        }
    }

    fn power_down(&mut self) {
        let domain = self.ctx.config.power_domain;
        self.transition(LifecycleState::PoweringDown);
        if let Err(e) = self.ctx.platform.power.power_down(domain) {
            warn!("Power down of {} failed: {}", domain, e);
        }
    }

    fn set_status(&self, value: &str) {
        let property = &self.ctx.config.status_property;
        if let Err(e) = self.ctx.platform.props.set(property, value) {
            warn!("Failed to set {}={}: {}", property, value, e);
        }
    }

    fn loader(&self) -> ModuleLoader<'a> {
        let ctx: &'a HalContext = self.ctx;
        let platform = &ctx.platform;
        ModuleLoader::new(
            platform.modules.as_ref(),
            platform.props.as_ref(),
            platform.clock.as_ref(),
        )
    }

    fn transition(&mut self, next: LifecycleState) {
        if *self.state != next {
            debug!("Driver state {} -> {}", self.state, next);
            *self.state = next;
        }
    }
}

/// Loaded check of a fixed-vendor driver.
fn fixed_check<'c>(ctx: &'c HalContext, fixed: &'c FixedDriver) -> LoadedCheck<'c> {
    LoadedCheck::StatusProperty {
        property: &ctx.config.status_property,
        module: fixed.module.as_ref().map(|m| m.name.as_str()),
    }
}
