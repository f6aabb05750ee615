//! HAL configuration.
//!
//! The configuration is resolved once at startup and selects the driver
//! strategy for the whole process:
//!
//! - [`DriverProfile::MultiVendor`] - probe the buses, identify the chip from
//!   the vendor registry and load its module
//! - [`DriverProfile::Fixed`] - always load one known module
//!
//! Every field has a default matching the stock platform layout, so an empty
//! JSON object is a valid configuration.
//!
//! # Example
//!
//! ```
//! use wifi_driver_hal::config::{DriverProfile, HalConfig};
//!
//! let config = HalConfig::from_json(r#"{
//!     "profile": {
//!         "kind": "fixed",
//!         "module": { "name": "bcmdhd", "path": "/vendor/lib/modules/bcmdhd.ko" }
//!     }
//! }"#).unwrap();
//! assert!(matches!(config.profile, DriverProfile::Fixed(_)));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::platform::PowerDomain;
use crate::vendor::{FirmwarePaths, VendorDescriptor, VendorRegistry};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "WIFI_HAL_CONFIG";

/// Placeholder replaced by the SDIO host device type in the attribute path.
pub const DEVICE_TYPE_PLACEHOLDER: &str = "{dev}";

/// Default persisted vendor slot.
pub const DEFAULT_VENDOR_STATE_PATH: &str = "/data/misc/wifi/wid_fp";

/// Default permission bits of the persisted vendor slot (rw-rw-r--).
pub const DEFAULT_VENDOR_STATE_MODE: u32 = 0o664;

/// `system` user id.
pub const AID_SYSTEM: u32 = 1000;

/// `wifi` group id.
pub const AID_WIFI: u32 = 1010;

/// Property holding the driver status (`ok` / `unloaded`).
pub const DEFAULT_STATUS_PROPERTY: &str = "wlan.driver.status";

/// Default SDIO chip attribute path template.
pub const DEFAULT_SDIO_ATTR_TEMPLATE: &str = "/sys/bus/mmc/devices/{dev}:0001/{dev}:0001:1/device";

/// Default runtime firmware path parameter of the Broadcom dhd driver.
pub const DEFAULT_FW_PATH_PARAM: &str = "/sys/module/dhd/parameters/firmware_path";

/// Top-level HAL configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HalConfig {
    /// Driver strategy.
    pub profile: DriverProfile,
    /// Persisted vendor slot.
    pub vendor_state: VendorStateConfig,
    /// Property holding the driver status.
    pub status_property: String,
    /// Firmware paths of default-class vendors.
    pub default_firmware: FirmwarePaths,
    /// Runtime firmware path parameter file.
    pub fw_path_param: Option<PathBuf>,
    /// SDIO chip attribute path, `{dev}` replaced by the device type.
    pub sdio_attr_template: String,
    /// Power rail switched around multi-vendor load/unload.
    pub power_domain: PowerDomain,
    /// Replacement vendor registry; the built-in table when absent.
    pub vendors: Option<Vec<VendorDescriptor>>,
    /// Locations used by the host backends.
    pub host: HostPaths,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            profile: DriverProfile::MultiVendor,
            vendor_state: VendorStateConfig::default(),
            status_property: DEFAULT_STATUS_PROPERTY.to_string(),
            default_firmware: FirmwarePaths::default(),
            fw_path_param: Some(PathBuf::from(DEFAULT_FW_PATH_PARAM)),
            sdio_attr_template: DEFAULT_SDIO_ATTR_TEMPLATE.to_string(),
            power_domain: PowerDomain::Sdio,
            vendors: None,
            host: HostPaths::default(),
        }
    }
}

impl HalConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Load from `$WIFI_HAL_CONFIG` if set, otherwise use the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    /// Check the configuration for values that can never work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vendor_state.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("vendor_state.path is empty".into()));
        }
        if self.status_property.is_empty() {
            return Err(ConfigError::Invalid("status_property is empty".into()));
        }
        if !self.sdio_attr_template.contains(DEVICE_TYPE_PLACEHOLDER) {
            return Err(ConfigError::Invalid(format!(
                "sdio_attr_template must contain {}",
                DEVICE_TYPE_PLACEHOLDER
            )));
        }
        if let Some(vendors) = &self.vendors {
            if vendors.is_empty() {
                return Err(ConfigError::Invalid("vendors list is empty".into()));
            }
            if let Some(d) = vendors.iter().find(|d| d.match_id.is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "vendor {} has an empty match_id",
                    d.vendor_name
                )));
            }
        }
        if let DriverProfile::Fixed(fixed) = &self.profile {
            fixed.validate()?;
        }
        Ok(())
    }

    /// Vendor registry selected by this configuration.
    pub fn registry(&self) -> VendorRegistry {
        match &self.vendors {
            Some(vendors) => VendorRegistry::new(vendors.clone()),
            None => VendorRegistry::builtin(),
        }
    }

    /// SDIO attribute path for the given host device type.
    pub fn sdio_attr_path(&self, device_type: &str) -> PathBuf {
        PathBuf::from(
            self.sdio_attr_template
                .replace(DEVICE_TYPE_PLACEHOLDER, device_type),
        )
    }
}

/// Driver strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriverProfile {
    /// Identify the chip at load time and pick its module from the registry.
    MultiVendor,
    /// Always drive the same module.
    Fixed(FixedDriver),
}

impl DriverProfile {
    /// Whether this is the multi-vendor strategy.
    pub fn is_multi_vendor(&self) -> bool {
        matches!(self, Self::MultiVendor)
    }
}

/// Single fixed-vendor driver settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedDriver {
    /// Module to load; drivers built into the kernel have none.
    pub module: Option<FixedModule>,
    /// Driver state control parameter file.
    pub state_ctrl_param: Option<PathBuf>,
    /// Value written to the state control parameter on load.
    pub state_on: String,
    /// Value written to the state control parameter on unload.
    pub state_off: String,
    /// Per-mode firmware images.
    pub firmware: FirmwarePaths,
}

impl Default for FixedDriver {
    fn default() -> Self {
        Self {
            module: None,
            state_ctrl_param: None,
            state_on: "1".to_string(),
            state_off: "0".to_string(),
            firmware: FirmwarePaths::unset(),
        }
    }
}

impl FixedDriver {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(module) = &self.module {
            if module.name.is_empty() || module.path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(
                    "fixed module needs a name and a path".into(),
                ));
            }
        }
        Ok(())
    }
}

/// The module of a fixed-vendor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedModule {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub args: String,
}

/// Persisted vendor slot settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorStateConfig {
    pub path: PathBuf,
    /// Permission bits enforced after each write.
    pub mode: u32,
    /// Ownership enforced after each write; skipped when absent.
    pub owner: Option<FileOwner>,
}

impl Default for VendorStateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_VENDOR_STATE_PATH),
            mode: DEFAULT_VENDOR_STATE_MODE,
            owner: Some(FileOwner {
                uid: AID_SYSTEM,
                gid: AID_WIFI,
            }),
        }
    }
}

/// User and group owning a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOwner {
    pub uid: u32,
    pub gid: u32,
}

/// Paths used by the Linux host backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostPaths {
    /// Directory holding one file per property.
    pub property_dir: PathBuf,
    /// Live module list.
    pub proc_modules: PathBuf,
    /// USB device directory.
    pub usb_devices: PathBuf,
    /// File reporting the SDIO host device type.
    pub sdio_device_type: PathBuf,
    /// SDIO power rail control file.
    pub sdio_power: PathBuf,
    /// USB power rail control file.
    pub usb_power: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            property_dir: PathBuf::from("/run/wifi-hal/props"),
            proc_modules: PathBuf::from("/proc/modules"),
            usb_devices: PathBuf::from("/sys/bus/usb/devices"),
            sdio_device_type: PathBuf::from("/sys/class/wifi_power/dev_type"),
            sdio_power: PathBuf::from("/sys/class/wifi_power/sdio_power"),
            usb_power: PathBuf::from("/sys/class/wifi_power/usb_power"),
        }
    }
}

/// Errors that can occur while loading the configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    Io { path: PathBuf, source: io::Error },
    /// The configuration is not valid JSON for [`HalConfig`].
    Parse(serde_json::Error),
    /// A value is out of range.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "cannot read {:?}: {}", path, source),
            Self::Parse(e) => write!(f, "invalid configuration: {}", e),
            Self::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}
