//! Persisted vendor identity.
//!
//! The vendor identified by the last successful probe is kept in a single
//! slot that outlives the process, so a later `unload_driver` or firmware path
//! query (possibly from another process) knows which chip is present.
//!
//! # Usage
//!
//! ```no_run
//! use wifi_driver_hal::state::{FileVendorStore, VendorStateStore};
//!
//! let store = FileVendorStore::new("/data/misc/wifi/wid_fp");
//! store.set("bcm6255")?;
//! assert_eq!(store.get().as_deref(), Some("bcm6255"));
//! # Ok::<(), wifi_driver_hal::HalError>(())
//! ```

use log::{debug, warn};
use std::cell::RefCell;
use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::config::{FileOwner, VendorStateConfig};
use crate::error::HalError;

/// Single-slot store for the current vendor name.
///
/// Writes overwrite unconditionally and there is no locking; callers
/// serialize access.
pub trait VendorStateStore {
    /// Stored vendor name, or `None` if nothing usable is stored.
    fn get(&self) -> Option<String>;

    /// Replace the stored vendor name.
    fn set(&self, vendor_name: &str) -> Result<(), HalError>;
}

/// Vendor slot kept in a plain text file.
#[derive(Debug, Clone)]
pub struct FileVendorStore {
    path: PathBuf,
    mode: Option<u32>,
    owner: Option<FileOwner>,
}

impl FileVendorStore {
    /// Store at `path` without enforcing permissions or ownership.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: None,
            owner: None,
        }
    }

    /// Store described by the configuration.
    pub fn from_config(config: &VendorStateConfig) -> Self {
        Self {
            path: config.path.clone(),
            mode: Some(config.mode),
            owner: config.owner,
        }
    }

    /// Enforce `mode` after each write.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Enforce ownership after each write.
    pub fn with_owner(mut self, owner: FileOwner) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, vendor_name: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, vendor_name)?;

        if let Some(mode) = self.mode {
            fs::set_permissions(&self.path, Permissions::from_mode(mode))?;
        }
        if let Some(owner) = self.owner {
            std::os::unix::fs::chown(&self.path, Some(owner.uid), Some(owner.gid))?;
        }
        Ok(())
    }
}

impl VendorStateStore for FileVendorStore {
    fn get(&self) -> Option<String> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No vendor state at {:?}", self.path);
                return None;
            }
            Err(e) => {
                warn!("Failed to read vendor state {:?}: {}", self.path, e);
                return None;
            }
        };
        normalize(&raw)
    }

    fn set(&self, vendor_name: &str) -> Result<(), HalError> {
        self.write(vendor_name)
            .map_err(HalError::PersistedStateIoError)?;
        debug!("Vendor state {:?} = {}", self.path, vendor_name);
        Ok(())
    }
}

/// Vendor slot held in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryVendorStore {
    value: RefCell<Option<String>>,
}

impl MemoryVendorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VendorStateStore for MemoryVendorStore {
    fn get(&self) -> Option<String> {
        self.value.borrow().as_deref().and_then(normalize)
    }

    fn set(&self, vendor_name: &str) -> Result<(), HalError> {
        *self.value.borrow_mut() = Some(vendor_name.to_string());
        Ok(())
    }
}

/// Strip padding; an empty slot counts as unset.
fn normalize(raw: &str) -> Option<String> {
    let name = raw.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
