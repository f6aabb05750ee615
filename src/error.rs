//! Error taxonomy for driver lifecycle operations.
//!
//! Every fallible operation in the crate reports one of these variants. At the
//! integer boundary (see [`crate::hal`]) each variant maps to a stable negative
//! code via [`HalError::code`].

use std::fmt;
use std::io;

/// Errors that can occur while identifying, loading or unloading the driver.
#[derive(Debug)]
pub enum HalError {
    /// No bus on which a radio could be attached is present.
    DeviceNotFound,
    /// No registered chip showed up within the probe budget.
    ProbeTimeout { attempts: u32 },
    /// USB enumeration reported an unrecoverable error.
    ProbeFatal(String),
    /// The kernel refused the module, or its file could not be opened.
    ModuleLoadFailed { module: String, reason: String },
    /// The module stayed busy for every unload attempt.
    ModuleUnloadBusy { module: String, attempts: u32 },
    /// The unload primitive failed with a non-transient error.
    ModuleUnloadFailed { module: String, reason: String },
    /// The module was removed but the loaded status never cleared.
    UnloadConfirmationTimeout { module: String },
    /// The persisted vendor slot could not be written.
    PersistedStateIoError(io::Error),
    /// The persisted vendor name is missing or not in the catalog.
    UnknownVendor(Option<String>),
    /// No firmware path exists for the requested mode.
    UnknownMode(String),
    /// The runtime firmware path parameter could not be written.
    FirmwareOverrideIoError(io::Error),
    /// The driver state control parameter could not be written.
    StateControlIoError(io::Error),
}

impl HalError {
    /// Negative status code reported at the integer boundary.
    pub fn code(&self) -> i32 {
        match self {
            Self::DeviceNotFound => -1,
            Self::ProbeTimeout { .. } => -2,
            Self::ProbeFatal(_) => -3,
            Self::ModuleLoadFailed { .. } => -4,
            Self::ModuleUnloadBusy { .. } => -5,
            Self::ModuleUnloadFailed { .. } => -6,
            Self::UnloadConfirmationTimeout { .. } => -7,
            Self::PersistedStateIoError(_) => -8,
            Self::UnknownVendor(_) => -9,
            Self::UnknownMode(_) => -10,
            Self::FirmwareOverrideIoError(_) => -11,
            Self::StateControlIoError(_) => -12,
        }
    }

    /// Whether the error was reported by the bus prober.
    pub fn is_probe_failure(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound | Self::ProbeTimeout { .. } | Self::ProbeFatal(_)
        )
    }
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceNotFound => write!(f, "no wireless device bus found"),
            Self::ProbeTimeout { attempts } => {
                write!(f, "no known chip found after {} probe attempts", attempts)
            }
            Self::ProbeFatal(msg) => write!(f, "bus enumeration failed: {}", msg),
            Self::ModuleLoadFailed { module, reason } => {
                write!(f, "failed to load module {}: {}", module, reason)
            }
            Self::ModuleUnloadBusy { module, attempts } => {
                write!(f, "module {} still busy after {} attempts", module, attempts)
            }
            Self::ModuleUnloadFailed { module, reason } => {
                write!(f, "failed to unload module {}: {}", module, reason)
            }
            Self::UnloadConfirmationTimeout { module } => {
                write!(f, "module {} unloaded but status never cleared", module)
            }
            Self::PersistedStateIoError(e) => write!(f, "vendor state I/O error: {}", e),
            Self::UnknownVendor(Some(name)) => write!(f, "unknown vendor: {}", name),
            Self::UnknownVendor(None) => write!(f, "no vendor identified"),
            Self::UnknownMode(msg) => write!(f, "unknown firmware mode: {}", msg),
            Self::FirmwareOverrideIoError(e) => {
                write!(f, "failed to write firmware path parameter: {}", e)
            }
            Self::StateControlIoError(e) => {
                write!(f, "failed to write driver state parameter: {}", e)
            }
        }
    }
}

impl std::error::Error for HalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::PersistedStateIoError(e)
            | Self::FirmwareOverrideIoError(e)
            | Self::StateControlIoError(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::error::Error;

    fn all_variants() -> Vec<HalError> {
        vec![
            HalError::DeviceNotFound,
            HalError::ProbeTimeout { attempts: 300 },
            HalError::ProbeFatal("io".into()),
            HalError::ModuleLoadFailed {
                module: "dhd".into(),
                reason: "EPERM".into(),
            },
            HalError::ModuleUnloadBusy {
                module: "dhd".into(),
                attempts: 10,
            },
            HalError::ModuleUnloadFailed {
                module: "dhd".into(),
                reason: "ENOENT".into(),
            },
            HalError::UnloadConfirmationTimeout {
                module: "dhd".into(),
            },
            HalError::PersistedStateIoError(io::Error::from(io::ErrorKind::PermissionDenied)),
            HalError::UnknownVendor(None),
            HalError::UnknownMode("7".into()),
            HalError::FirmwareOverrideIoError(io::Error::from(io::ErrorKind::NotFound)),
            HalError::StateControlIoError(io::Error::from(io::ErrorKind::NotFound)),
        ]
    }

    #[test]
    fn test_codes_are_negative_and_distinct() {
        let codes: Vec<i32> = all_variants().iter().map(HalError::code).collect();
        assert!(codes.iter().all(|c| *c < 0));
        let unique: HashSet<i32> = codes.iter().copied().collect();
        assert_eq!(unique.len(), codes.len());
    }

    #[test]
    fn test_io_errors_expose_source() {
        let err = HalError::PersistedStateIoError(io::Error::from(io::ErrorKind::NotFound));
        assert!(err.source().is_some());
        assert!(HalError::DeviceNotFound.source().is_none());
    }

    #[test]
    fn test_display() {
        let err = HalError::ProbeTimeout { attempts: 300 };
        assert_eq!(err.to_string(), "no known chip found after 300 probe attempts");
        let err = HalError::UnknownVendor(Some("bcm9999".into()));
        assert_eq!(err.to_string(), "unknown vendor: bcm9999");
    }

    #[test]
    fn test_probe_failure_classification() {
        assert!(HalError::ProbeTimeout { attempts: 1 }.is_probe_failure());
        assert!(HalError::DeviceNotFound.is_probe_failure());
        assert!(!HalError::UnknownVendor(None).is_probe_failure());
    }
}
