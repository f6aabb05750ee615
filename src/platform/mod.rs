//! Platform abstraction layer.
//!
//! The lifecycle logic never touches the kernel, the buses or the property
//! store directly. It goes through the narrow traits in this module, which are
//! bundled into a [`Platform`]:
//!
//! - [`KernelModules`] - load/unload a module and inspect the module list
//! - [`UsbBus`] - enumerate USB devices
//! - [`SdioBus`] - device-type query and SDIO attribute reads
//! - [`PowerControl`] - radio power rails
//! - [`PropertyStore`] - process-wide status properties
//! - [`ParamWriter`] - writable driver parameter files
//! - [`Clock`] - fixed-interval sleeps
//!
//! [`linux`] provides host backends built on sysfs, procfs and the
//! `insmod`/`rmmod` tools.

use std::fmt;
use std::io;
use std::path::Path;
use std::time::Duration;

pub mod linux;

/// Failure reported by the module unload primitive.
#[derive(Debug)]
pub enum UnloadError {
    /// The module is busy; the caller may retry.
    TryAgain,
    /// Any other failure.
    Failed(String),
}

impl fmt::Display for UnloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TryAgain => write!(f, "resource temporarily unavailable"),
            Self::Failed(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for UnloadError {}

/// Kernel module primitives.
pub trait KernelModules {
    /// Load the module binary at `path` with `args`.
    fn load(&self, path: &Path, args: &str) -> io::Result<()>;

    /// Remove module `name` without blocking.
    fn unload(&self, name: &str) -> Result<(), UnloadError>;

    /// Whether `name` appears in the live module list.
    fn is_listed(&self, name: &str) -> io::Result<bool>;
}

/// A device seen on the USB bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbDevice {
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Failure reported by USB enumeration.
#[derive(Debug)]
pub enum UsbScanError {
    /// There is no USB bus at all.
    NoBus,
    /// The bus is still settling; enumeration may succeed later.
    NotReady(String),
    /// Enumeration cannot succeed.
    Fatal(String),
}

impl fmt::Display for UsbScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoBus => write!(f, "no USB bus present"),
            Self::NotReady(msg) => write!(f, "USB bus not ready: {}", msg),
            Self::Fatal(msg) => write!(f, "USB enumeration failed: {}", msg),
        }
    }
}

impl std::error::Error for UsbScanError {}

/// USB enumeration.
pub trait UsbBus {
    /// List the devices currently attached.
    fn devices(&self) -> Result<Vec<UsbDevice>, UsbScanError>;
}

/// SDIO identification.
pub trait SdioBus {
    /// Host controller device type used to build the attribute path.
    fn device_type(&self) -> Option<String>;

    /// Read the chip attribute file at `path`.
    fn read_attr(&self, path: &Path) -> io::Result<String>;
}

/// Power rail the radio is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerDomain {
    Sdio,
    Usb,
}

impl fmt::Display for PowerDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sdio => write!(f, "sdio"),
            Self::Usb => write!(f, "usb"),
        }
    }
}

/// Radio power control.
pub trait PowerControl {
    fn power_up(&self, domain: PowerDomain) -> io::Result<()>;
    fn power_down(&self, domain: PowerDomain) -> io::Result<()>;
}

/// Process-wide property store.
pub trait PropertyStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> io::Result<()>;
}

/// Writable driver parameter files.
pub trait ParamWriter {
    /// Write `value` to the existing parameter file at `path`.
    fn write_param(&self, path: &Path, value: &[u8]) -> io::Result<()>;
}

/// Sleep source.
pub trait Clock {
    fn sleep(&self, duration: Duration);
}

/// All collaborators the driver lifecycle needs.
pub struct Platform {
    pub modules: Box<dyn KernelModules>,
    pub usb: Box<dyn UsbBus>,
    pub sdio: Box<dyn SdioBus>,
    pub power: Box<dyn PowerControl>,
    pub props: Box<dyn PropertyStore>,
    pub params: Box<dyn ParamWriter>,
    pub clock: Box<dyn Clock>,
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}
