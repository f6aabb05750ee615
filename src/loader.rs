//! Kernel module loading and unloading.
//!
//! Wraps the raw [`KernelModules`] primitives with the retry and status
//! policies the lifecycle relies on:
//!
//! - unload retries only while the kernel reports the module busy
//!   ([`UNLOAD_ATTEMPTS`] calls, [`UNLOAD_RETRY_INTERVAL`] apart)
//! - the loaded check either trusts the module list or cross-checks the
//!   driver status property and repairs it when stale

use log::{debug, info, warn};
use std::path::Path;
use std::time::Duration;

use crate::error::HalError;
use crate::platform::{Clock, KernelModules, PropertyStore, UnloadError};

/// Maximum unload primitive calls.
pub const UNLOAD_ATTEMPTS: u32 = 10;

/// Wait between busy unload attempts.
pub const UNLOAD_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Status property value while the driver is loaded.
pub const STATUS_OK: &str = "ok";

/// Status property value once the driver is unloaded.
pub const STATUS_UNLOADED: &str = "unloaded";

/// How to decide whether the driver is loaded.
#[derive(Debug, Clone, Copy)]
pub enum LoadedCheck<'a> {
    /// Trust the status property, cross-checked against the module list when
    /// a module name is given.
    StatusProperty {
        property: &'a str,
        module: Option<&'a str>,
    },
    /// Membership in the live module list.
    ModuleListed(&'a str),
}

/// Load/unload policy on top of the kernel primitives.
pub struct ModuleLoader<'a> {
    modules: &'a dyn KernelModules,
    props: &'a dyn PropertyStore,
    clock: &'a dyn Clock,
}

impl<'a> ModuleLoader<'a> {
    pub fn new(
        modules: &'a dyn KernelModules,
        props: &'a dyn PropertyStore,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            modules,
            props,
            clock,
        }
    }

    /// Load the module at `path` with `args`.
    pub fn load(&self, path: &Path, args: &str) -> Result<(), HalError> {
        debug!("Loading {:?} args=\"{}\"", path, args);
        self.modules.load(path, args).map_err(|e| {
            warn!("Failed to load {:?}: {}", path, e);
            HalError::ModuleLoadFailed {
                module: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        info!("Loaded {:?}", path);
        Ok(())
    }

    /// Remove module `name`, retrying while it is busy.
    pub fn unload(&self, name: &str) -> Result<(), HalError> {
        for attempt in 1..=UNLOAD_ATTEMPTS {
            match self.modules.unload(name) {
                Ok(()) => {
                    info!("Unloaded {}", name);
                    return Ok(());
                }
                Err(UnloadError::TryAgain) => {
                    debug!(
                        "Module {} busy (attempt {}/{})",
                        name, attempt, UNLOAD_ATTEMPTS
                    );
                    if attempt < UNLOAD_ATTEMPTS {
                        self.clock.sleep(UNLOAD_RETRY_INTERVAL);
                    }
                }
                Err(UnloadError::Failed(reason)) => {
                    debug!("Unable to unload driver module '{}': {}", name, reason);
                    return Err(HalError::ModuleUnloadFailed {
                        module: name.to_string(),
                        reason,
                    });
                }
            }
        }

        debug!("Unable to unload driver module '{}': still busy", name);
        Err(HalError::ModuleUnloadBusy {
            module: name.to_string(),
            attempts: UNLOAD_ATTEMPTS,
        })
    }

    /// Whether the driver is currently loaded according to `check`.
    pub fn is_loaded(&self, check: LoadedCheck<'_>) -> bool {
        match check {
            LoadedCheck::ModuleListed(name) => self.is_listed(name),
            LoadedCheck::StatusProperty { property, module } => {
                if self.props.get(property).as_deref() != Some(STATUS_OK) {
                    return false;
                }
                let Some(name) = module else {
                    return true;
                };

                // The property may be left over from a crash or manual unload
                match self.modules.is_listed(name) {
                    Ok(true) => true,
                    Ok(false) => {
                        debug!("Status says loaded but {} is not listed", name);
                        self.mark_unloaded(property);
                        false
                    }
                    Err(e) => {
                        warn!("Could not read module list: {}", e);
                        self.mark_unloaded(property);
                        false
                    }
                }
            }
        }
    }

    /// Whether `name` may still be resident; an unreadable listing counts as
    /// resident so removal is still attempted.
    pub fn may_be_listed(&self, name: &str) -> bool {
        self.modules.is_listed(name).unwrap_or_else(|e| {
            warn!("Could not read module list, assuming {} is loaded: {}", name, e);
            true
        })
    }

    fn is_listed(&self, name: &str) -> bool {
        self.modules.is_listed(name).unwrap_or_else(|e| {
            warn!("Could not read module list: {}", e);
            false
        })
    }

    fn mark_unloaded(&self, property: &str) {
        if let Err(e) = self.props.set(property, STATUS_UNLOADED) {
            warn!("Failed to reset {}: {}", property, e);
        }
    }
}
