//! Everything an operation needs, owned in one place.

use crate::config::HalConfig;
use crate::platform::{linux, Platform};
use crate::state::{FileVendorStore, VendorStateStore};
use crate::vendor::{FirmwareCatalog, VendorRegistry};

/// Configuration, tables, platform backends and the vendor slot.
pub struct HalContext {
    pub config: HalConfig,
    pub registry: VendorRegistry,
    pub catalog: FirmwareCatalog,
    pub platform: Platform,
    pub store: Box<dyn VendorStateStore>,
}

impl HalContext {
    /// Assemble a context from explicit parts.
    pub fn new(config: HalConfig, platform: Platform, store: Box<dyn VendorStateStore>) -> Self {
        let registry = config.registry();
        Self {
            config,
            registry,
            catalog: FirmwareCatalog::builtin(),
            platform,
            store,
        }
    }

    /// Context backed by the local Linux system.
    pub fn host(config: HalConfig) -> Self {
        let platform = linux::host_platform(&config.host);
        let store = Box::new(FileVendorStore::from_config(&config.vendor_state));
        Self::new(config, platform, store)
    }
}

impl std::fmt::Debug for HalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HalContext")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
