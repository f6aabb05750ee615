//! Simulated platform collaborators for unit tests.
//!
//! Every simulated backend appends to a shared [`Journal`], so tests can assert
//! on the exact order of power, module and property operations.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use crate::platform::{
    Clock, KernelModules, ParamWriter, Platform, PowerControl, PowerDomain, PropertyStore,
    SdioBus, UnloadError, UsbBus, UsbDevice, UsbScanError,
};

/// Observable side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    PowerUp(PowerDomain),
    PowerDown(PowerDomain),
    Load { path: PathBuf, args: String },
    Unload(String),
    UsbScan,
    SdioRead(PathBuf),
    SetProp { key: String, value: String },
    WriteParam { path: PathBuf, value: Vec<u8> },
    Sleep(Duration),
}

/// Shared, ordered event log.
#[derive(Debug, Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<Event>>>);

impl Journal {
    pub fn push(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.0.borrow().iter().filter(|e| pred(e)).count()
    }

    /// Events other than sleeps and USB scans.
    pub fn actions(&self) -> Vec<Event> {
        self.0
            .borrow()
            .iter()
            .filter(|e| !matches!(e, Event::Sleep(_) | Event::UsbScan))
            .cloned()
            .collect()
    }

    pub fn total_sleep(&self) -> Duration {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Sleep(d) => Some(*d),
                _ => None,
            })
            .sum()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

/// Scripted outcome of an unload call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadOutcome {
    Ok,
    TryAgain,
    Fail,
}

/// Shared mutable state of the simulated kernel.
#[derive(Debug, Default)]
pub struct ModuleState {
    /// Currently listed modules.
    pub listed: HashSet<String>,
    /// Module paths the kernel rejects.
    pub failing_loads: HashSet<PathBuf>,
    /// Scripted unload results, consumed in order; `Ok` once exhausted.
    pub unload_script: VecDeque<UnloadOutcome>,
    /// Module stays listed after a successful unload.
    pub sticky: bool,
    /// The module list cannot be read.
    pub listing_broken: bool,
}

pub struct SimModules {
    journal: Journal,
    state: Rc<RefCell<ModuleState>>,
}

impl KernelModules for SimModules {
    fn load(&self, path: &Path, args: &str) -> io::Result<()> {
        self.journal.push(Event::Load {
            path: path.to_path_buf(),
            args: args.to_string(),
        });
        let mut state = self.state.borrow_mut();
        if state.failing_loads.contains(path) {
            return Err(io::Error::other("Invalid module format"));
        }
        // Modules list under their file stem
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        state.listed.insert(name);
        Ok(())
    }

    fn unload(&self, name: &str) -> Result<(), UnloadError> {
        self.journal.push(Event::Unload(name.to_string()));
        let mut state = self.state.borrow_mut();
        match state.unload_script.pop_front().unwrap_or(UnloadOutcome::Ok) {
            UnloadOutcome::Ok => {
                if !state.sticky {
                    state.listed.remove(name);
                }
                Ok(())
            }
            UnloadOutcome::TryAgain => Err(UnloadError::TryAgain),
            UnloadOutcome::Fail => Err(UnloadError::Failed("No such file or directory".into())),
        }
    }

    fn is_listed(&self, name: &str) -> io::Result<bool> {
        let state = self.state.borrow();
        if state.listing_broken {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        Ok(state.listed.contains(name))
    }
}

/// Scripted USB bus: results are consumed in order, the last one repeats.
pub struct SimUsb {
    journal: Journal,
    script: Rc<RefCell<VecDeque<UsbScript>>>,
}

#[derive(Debug, Clone)]
pub enum UsbScript {
    Devices(Vec<u16>),
    NoBus,
    NotReady,
    Fatal,
}

impl UsbBus for SimUsb {
    fn devices(&self) -> Result<Vec<UsbDevice>, UsbScanError> {
        self.journal.push(Event::UsbScan);
        let mut script = self.script.borrow_mut();
        let step = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        match step.unwrap_or(UsbScript::Devices(Vec::new())) {
            UsbScript::Devices(ids) => Ok(ids
                .into_iter()
                .map(|product_id| UsbDevice {
                    vendor_id: 0x0bda,
                    product_id,
                })
                .collect()),
            UsbScript::NoBus => Err(UsbScanError::NoBus),
            UsbScript::NotReady => Err(UsbScanError::NotReady("settling".into())),
            UsbScript::Fatal => Err(UsbScanError::Fatal("libusb init failed".into())),
        }
    }
}

#[derive(Debug, Default)]
pub struct SdioState {
    pub device_type: Option<String>,
    pub attrs: HashMap<PathBuf, String>,
}

pub struct SimSdio {
    journal: Journal,
    state: Rc<RefCell<SdioState>>,
}

impl SdioBus for SimSdio {
    fn device_type(&self) -> Option<String> {
        self.state.borrow().device_type.clone()
    }

    fn read_attr(&self, path: &Path) -> io::Result<String> {
        self.journal.push(Event::SdioRead(path.to_path_buf()));
        self.state
            .borrow()
            .attrs
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }
}

pub struct SimPower {
    journal: Journal,
}

impl PowerControl for SimPower {
    fn power_up(&self, domain: PowerDomain) -> io::Result<()> {
        self.journal.push(Event::PowerUp(domain));
        Ok(())
    }

    fn power_down(&self, domain: PowerDomain) -> io::Result<()> {
        self.journal.push(Event::PowerDown(domain));
        Ok(())
    }
}

pub struct SimProps {
    journal: Journal,
    values: Rc<RefCell<HashMap<String, String>>>,
}

impl PropertyStore for SimProps {
    fn get(&self, key: &str) -> Option<String> {
        self.values.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        self.journal.push(Event::SetProp {
            key: key.to_string(),
            value: value.to_string(),
        });
        self.values
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

pub struct SimParams {
    journal: Journal,
    writable: Rc<RefCell<HashSet<PathBuf>>>,
}

impl ParamWriter for SimParams {
    fn write_param(&self, path: &Path, value: &[u8]) -> io::Result<()> {
        if !self.writable.borrow().contains(path) {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        self.journal.push(Event::WriteParam {
            path: path.to_path_buf(),
            value: value.to_vec(),
        });
        Ok(())
    }
}

pub struct SimClock {
    journal: Journal,
}

impl Clock for SimClock {
    fn sleep(&self, duration: Duration) {
        self.journal.push(Event::Sleep(duration));
    }
}

/// Handles for steering and inspecting a simulated [`Platform`].
#[derive(Clone, Default)]
pub struct SimHandles {
    pub journal: Journal,
    pub modules: Rc<RefCell<ModuleState>>,
    pub usb: Rc<RefCell<VecDeque<UsbScript>>>,
    pub sdio: Rc<RefCell<SdioState>>,
    pub props: Rc<RefCell<HashMap<String, String>>>,
    pub params: Rc<RefCell<HashSet<PathBuf>>>,
}

impl SimHandles {
    pub fn set_usb(&self, steps: Vec<UsbScript>) {
        *self.usb.borrow_mut() = steps.into();
    }

    pub fn set_sdio(&self, device_type: &str, path: &str, attr: &str) {
        let mut sdio = self.sdio.borrow_mut();
        sdio.device_type = Some(device_type.to_string());
        sdio.attrs.insert(PathBuf::from(path), attr.to_string());
    }

    pub fn prop(&self, key: &str) -> Option<String> {
        self.props.borrow().get(key).cloned()
    }

    pub fn set_prop(&self, key: &str, value: &str) {
        self.props
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
    }

    pub fn list_module(&self, name: &str) {
        self.modules.borrow_mut().listed.insert(name.to_string());
    }

    pub fn is_listed(&self, name: &str) -> bool {
        self.modules.borrow().listed.contains(name)
    }

    pub fn fail_load(&self, path: &str) {
        self.modules
            .borrow_mut()
            .failing_loads
            .insert(PathBuf::from(path));
    }

    pub fn script_unload(&self, outcomes: &[UnloadOutcome]) {
        self.modules
            .borrow_mut()
            .unload_script
            .extend(outcomes.iter().copied());
    }

    pub fn allow_param(&self, path: &str) {
        self.params.borrow_mut().insert(PathBuf::from(path));
    }

    /// Build a platform wired to these handles.
    pub fn platform(&self) -> Platform {
        Platform {
            modules: Box::new(SimModules {
                journal: self.journal.clone(),
                state: self.modules.clone(),
            }),
            usb: Box::new(SimUsb {
                journal: self.journal.clone(),
                script: self.usb.clone(),
            }),
            sdio: Box::new(SimSdio {
                journal: self.journal.clone(),
                state: self.sdio.clone(),
            }),
            power: Box::new(SimPower {
                journal: self.journal.clone(),
            }),
            props: Box::new(SimProps {
                journal: self.journal.clone(),
                values: self.props.clone(),
            }),
            params: Box::new(SimParams {
                journal: self.journal.clone(),
                writable: self.params.clone(),
            }),
            clock: Box::new(SimClock {
                journal: self.journal.clone(),
            }),
        }
    }
}

/// Simulated platform plus the handles steering it.
pub fn sim_platform() -> (Platform, SimHandles) {
    let handles = SimHandles::default();
    (handles.platform(), handles)
}
