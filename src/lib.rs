//! Wi-Fi driver hardware abstraction layer.
//!
//! Identifies the attached wireless chip (SDIO attribute or USB product id),
//! loads and unloads its kernel module with power sequencing, remembers the
//! identified vendor across processes, and selects firmware images per
//! operating mode.
//!
//! Platform primitives sit behind the traits in [`platform`], so everything
//! except the [`platform::linux`] backends can be tested on any host.

pub mod config;
pub mod context;
pub mod error;
pub mod fw_path;
pub mod hal;
pub mod lifecycle;
pub mod loader;
pub mod platform;
pub mod probe;
pub mod state;
pub mod vendor;

#[cfg(test)]
mod sim;

// Re-export commonly used items
pub use config::{ConfigError, DriverProfile, HalConfig};
pub use error::HalError;
pub use hal::WifiHal;
pub use lifecycle::LifecycleState;
pub use state::{FileVendorStore, MemoryVendorStore, VendorStateStore};
pub use vendor::{FirmwareMode, VendorDescriptor, VendorRegistry};
