//! Linux host backends.
//!
//! These backends talk to a real system: sysfs for bus and power state,
//! `/proc/modules` for the module list, and the `insmod`/`rmmod` tools for
//! module loading. Properties live as one file per key under a directory.

use log::{debug, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use super::{
    Clock, KernelModules, ParamWriter, Platform, PowerControl, PowerDomain, PropertyStore,
    SdioBus, UnloadError, UsbBus, UsbDevice, UsbScanError,
};
use crate::config::HostPaths;

/// Upper bound on bytes read from the SDIO chip attribute.
pub const SDIO_ATTR_MAX_LEN: u64 = 128;

/// Loads and unloads modules with `insmod`/`rmmod`.
pub struct CommandKernelModules {
    proc_modules: PathBuf,
}

impl CommandKernelModules {
    pub fn new(proc_modules: impl Into<PathBuf>) -> Self {
        Self {
            proc_modules: proc_modules.into(),
        }
    }
}

/// Whether `rmmod` stderr reports a busy module worth retrying.
///
/// kmod checks the reference count itself and reports "is in use" without
/// reaching the syscall, so that counts as busy too.
fn is_transient_unload_failure(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("resource temporarily unavailable")
        || lower.contains("try again")
        || lower.contains("is in use")
}

/// Whether a `/proc/modules` listing contains `name`.
pub fn module_list_contains(listing: &str, name: &str) -> bool {
    listing
        .lines()
        .any(|line| line.split_whitespace().next() == Some(name))
}

impl KernelModules for CommandKernelModules {
    fn load(&self, path: &Path, args: &str) -> io::Result<()> {
        // Fail early with the open error instead of insmod's
        File::open(path)?;

        let output = Command::new("insmod")
            .arg(path)
            .args(args.split_whitespace())
            .output()?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(io::Error::other(stderr))
        }
    }

    fn unload(&self, name: &str) -> Result<(), UnloadError> {
        let output = Command::new("rmmod")
            .arg(name)
            .output()
            .map_err(|e| UnloadError::Failed(e.to_string()))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_transient_unload_failure(&stderr) {
            debug!("rmmod {}: {}", name, stderr);
            Err(UnloadError::TryAgain)
        } else {
            Err(UnloadError::Failed(stderr))
        }
    }

    fn is_listed(&self, name: &str) -> io::Result<bool> {
        let listing = fs::read_to_string(&self.proc_modules)?;
        Ok(module_list_contains(&listing, name))
    }
}

/// Enumerates USB devices from sysfs.
pub struct SysfsUsbBus {
    root: PathBuf,
}

impl SysfsUsbBus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn read_hex_id(path: &Path) -> io::Result<u16> {
    let raw = fs::read_to_string(path)?;
    u16::from_str_radix(raw.trim(), 16)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

impl UsbBus for SysfsUsbBus {
    fn devices(&self) -> Result<Vec<UsbDevice>, UsbScanError> {
        if !self.root.is_dir() {
            return Err(UsbScanError::NoBus);
        }

        let pattern = format!("{}/*/idProduct", self.root.display());
        let paths = glob::glob(&pattern).map_err(|e| UsbScanError::Fatal(e.to_string()))?;

        let mut devices = Vec::new();
        for path in paths.flatten() {
            // Devices may vanish mid-scan while the bus settles
            let product_id = read_hex_id(&path)
                .map_err(|e| UsbScanError::NotReady(format!("{}: {}", path.display(), e)))?;
            let vendor_id = path
                .parent()
                .map(|dir| dir.join("idVendor"))
                .and_then(|p| read_hex_id(&p).ok())
                .unwrap_or(0);
            devices.push(UsbDevice {
                vendor_id,
                product_id,
            });
        }
        Ok(devices)
    }
}

/// SDIO identification through sysfs.
pub struct SysfsSdio {
    device_type_file: PathBuf,
}

impl SysfsSdio {
    pub fn new(device_type_file: impl Into<PathBuf>) -> Self {
        Self {
            device_type_file: device_type_file.into(),
        }
    }
}

impl SdioBus for SysfsSdio {
    fn device_type(&self) -> Option<String> {
        match fs::read_to_string(&self.device_type_file) {
            Ok(s) => {
                let s = s.trim().trim_matches('\0').to_string();
                if s.is_empty() {
                    None
                } else {
                    Some(s)
                }
            }
            Err(e) => {
                debug!(
                    "Cannot read SDIO device type from {:?}: {}",
                    self.device_type_file, e
                );
                None
            }
        }
    }

    fn read_attr(&self, path: &Path) -> io::Result<String> {
        let mut buf = Vec::new();
        File::open(path)?
            .take(SDIO_ATTR_MAX_LEN)
            .read_to_end(&mut buf)?;
        if buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "empty SDIO attribute",
            ));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Power rails switched through control files (`1` = on, `0` = off).
pub struct FilePowerControl {
    sdio: PathBuf,
    usb: PathBuf,
}

impl FilePowerControl {
    pub fn new(sdio: impl Into<PathBuf>, usb: impl Into<PathBuf>) -> Self {
        Self {
            sdio: sdio.into(),
            usb: usb.into(),
        }
    }

    fn write(&self, domain: PowerDomain, value: &str) -> io::Result<()> {
        let path = match domain {
            PowerDomain::Sdio => &self.sdio,
            PowerDomain::Usb => &self.usb,
        };
        let mut file = OpenOptions::new().write(true).open(path)?;
        file.write_all(value.as_bytes())
    }
}

impl PowerControl for FilePowerControl {
    fn power_up(&self, domain: PowerDomain) -> io::Result<()> {
        self.write(domain, "1")
    }

    fn power_down(&self, domain: PowerDomain) -> io::Result<()> {
        self.write(domain, "0")
    }
}

/// Properties stored as one file per key.
pub struct FilePropertyStore {
    dir: PathBuf,
}

impl FilePropertyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl PropertyStore for FilePropertyStore {
    fn get(&self, key: &str) -> Option<String> {
        match fs::read_to_string(self.key_path(key)) {
            Ok(value) => Some(value.trim().to_string()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read property {}: {}", key, e);
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.key_path(key), value)
    }
}

/// Writes to existing parameter files only (sysfs nodes are never created).
pub struct FileParamWriter;

impl ParamWriter for FileParamWriter {
    fn write_param(&self, path: &Path, value: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().write(true).open(path)?;
        let written = file.write(value)?;
        if written != value.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write: {} of {} bytes", written, value.len()),
            ));
        }
        Ok(())
    }
}

/// Sleeps on the calling thread.
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Platform backed by the local Linux system.
pub fn host_platform(paths: &HostPaths) -> Platform {
    Platform {
        modules: Box::new(CommandKernelModules::new(&paths.proc_modules)),
        usb: Box::new(SysfsUsbBus::new(&paths.usb_devices)),
        sdio: Box::new(SysfsSdio::new(&paths.sdio_device_type)),
        power: Box::new(FilePowerControl::new(&paths.sdio_power, &paths.usb_power)),
        props: Box::new(FilePropertyStore::new(&paths.property_dir)),
        params: Box::new(FileParamWriter),
        clock: Box::new(SystemClock),
    }
}
