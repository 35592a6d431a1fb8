//! Per-device key injection engine.
//!
//! An [`Injector`] owns one device's input stream for the lifetime of an
//! injection session: it grabs the source device exclusively (EVIOCGRAB),
//! creates a uinput sink, and forwards events through the resolved mapping
//! on a dedicated blocking task. The registry talks to it only through the
//! trait, so tests substitute recording fakes.

use crate::keycodes::DISABLE_CODE;
use crate::preset::{ResolvedMapping, Trigger};
use keyremap_common::InjectorState;
use std::fs::OpenOptions;
use std::mem;
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// Linux input event constants
const EV_SYN: u16 = 0x00;
const EV_KEY: u16 = 0x01;
const SYN_REPORT: u16 = 0x00;

// uinput ioctl constants
const UI_SET_EVBIT: u64 = 0x40045564; // _IOW('U', 100, int)
const UI_SET_KEYBIT: u64 = 0x40045565; // _IOW('U', 101, int)
const UI_DEV_CREATE: u64 = 0x5501; // _IO('U', 1)
const UI_DEV_DESTROY: u64 = 0x5502; // _IO('U', 2)

// EVIOCGRAB ioctl number for exclusive device access
const EVIOCGRAB: u64 = 0x40044590;

const UINPUT_PATH: &str = "/dev/uinput";

// How long the forwarding loop waits in poll() before rechecking the
// shutdown flag.
const POLL_INTERVAL_MS: i32 = 250;

#[derive(Error, Debug)]
pub enum InjectorError {
    #[error("failed to start injection: {0}")]
    Start(String),
    #[error("failed to stop injection: {0}")]
    Stop(String),
}

/// One injection session for one device.
///
/// `stop` blocks until the underlying unit of execution confirms
/// termination; after it returns, no more events flow for the device.
#[async_trait::async_trait]
pub trait Injector: Send + Sync {
    async fn start(&mut self) -> Result<(), InjectorError>;
    async fn stop(&mut self) -> Result<(), InjectorError>;
    fn state(&self) -> InjectorState;
}

/// Builds injectors for the registry. The registry is the only caller.
pub trait InjectorFactory: Send + Sync {
    fn create(
        &self,
        device: &str,
        source: Option<PathBuf>,
        mapping: ResolvedMapping,
    ) -> Box<dyn Injector>;
}

/// What to do with one incoming event.
#[derive(Debug, PartialEq, Eq)]
enum EventAction {
    /// Write the event through unchanged.
    Pass,
    /// Write with the code replaced by the mapped target.
    Remap(u16),
    /// Swallow the event (mapped to `disable`).
    Discard,
}

/// State the forwarding loop leaves behind when it exits on its own.
/// `None` when the exit was a requested shutdown; `stop()` owns the
/// transition then. A loop that dies unrequested (device unplugged, read
/// error) must not keep reporting `Running` with no task alive.
fn loop_exit_state(shutdown: &AtomicBool) -> Option<InjectorState> {
    if shutdown.load(Ordering::SeqCst) {
        None
    } else {
        Some(InjectorState::Failed)
    }
}

/// Pure remap decision, split out so it can be tested without hardware.
fn decide(mapping: &ResolvedMapping, ev_type: u16, code: u16, _value: i32) -> EventAction {
    if ev_type != EV_KEY {
        return EventAction::Pass;
    }
    // Triggers are stored with the press value; press and release of the
    // same code follow the same mapping so keys cannot get stuck down.
    match mapping.target(&Trigger(vec![(ev_type as u32, code as u32, 1)])) {
        Some(target) if target == DISABLE_CODE => EventAction::Discard,
        Some(target) => EventAction::Remap(target as u16),
        None => EventAction::Pass,
    }
}

/// Linux input_event structure
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct InputEventRaw {
    time: libc::timeval,
    type_: u16,
    code: u16,
    value: i32,
}

/// uinput_user_dev structure for device setup
#[repr(C)]
struct UinputUserDev {
    name: [u8; 80],
    id: InputId,
    ff_effects_max: u32,
    absmax: [i32; 64],
    absmin: [i32; 64],
    absfuzz: [i32; 64],
    absflat: [i32; 64],
}

#[repr(C)]
struct InputId {
    bustype: u16,
    vendor: u16,
    product: u16,
    version: u16,
}

/// Production injector: EVIOCGRAB on the source, uinput sink, forwarding
/// loop on a blocking task.
pub struct EvdevInjector {
    device: String,
    source: Option<PathBuf>,
    mapping: ResolvedMapping,
    state: Arc<RwLock<InjectorState>>,
    shutdown: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl EvdevInjector {
    pub fn new(device: &str, source: Option<PathBuf>, mapping: ResolvedMapping) -> Self {
        Self {
            device: device.to_string(),
            source,
            mapping,
            state: Arc::new(RwLock::new(InjectorState::Unknown)),
            shutdown: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    fn set_state(&self, state: InjectorState) {
        *self.state.write().unwrap() = state;
    }

    /// Create the uinput sink device. Enables EV_KEY for every key code the
    /// mapping could emit plus everything a keyboard can send.
    ///
    /// The fd stays owned by the `File` until setup succeeds, so every
    /// error branch closes it on drop. Failed starts are an expected,
    /// retryable path and must not accumulate fds.
    fn create_uinput_device(device: &str, uinput_path: &Path) -> Result<RawFd, String> {
        let uinput_file = OpenOptions::new()
            .write(true)
            .open(uinput_path)
            .map_err(|e| format!("failed to open {}: {}", uinput_path.display(), e))?;

        let fd = uinput_file.as_raw_fd();

        unsafe {
            if libc::ioctl(fd, UI_SET_EVBIT, EV_KEY as libc::c_int) < 0 {
                return Err("failed to set EV_KEY bit".to_string());
            }
            if libc::ioctl(fd, UI_SET_EVBIT, EV_SYN as libc::c_int) < 0 {
                return Err("failed to set EV_SYN bit".to_string());
            }
            for key in 0..0x2ffu16 {
                if libc::ioctl(fd, UI_SET_KEYBIT, key as libc::c_int) < 0 {
                    debug!("Could not enable keybit {}", key);
                }
            }
        }

        let mut dev: UinputUserDev = unsafe { mem::zeroed() };
        let name = format!("keyremap {}", device);
        let name_bytes = name.as_bytes();
        let len = name_bytes.len().min(79);
        dev.name[..len].copy_from_slice(&name_bytes[..len]);
        dev.id.bustype = 0x03; // BUS_USB
        dev.id.vendor = 0x0001;
        dev.id.product = 0x0001;
        dev.id.version = 1;

        unsafe {
            let dev_ptr = &dev as *const UinputUserDev as *const libc::c_void;
            if libc::write(fd, dev_ptr, mem::size_of::<UinputUserDev>()) < 0 {
                return Err("failed to write uinput device structure".to_string());
            }
            if libc::ioctl(fd, UI_DEV_CREATE) < 0 {
                return Err("failed to create uinput device".to_string());
            }
        }

        info!("Created uinput sink \"{}\"", name);
        // Ownership moves to the forwarding task, which closes it on exit.
        Ok(uinput_file.into_raw_fd())
    }

    fn write_event(fd: RawFd, type_: u16, code: u16, value: i32) {
        let mut event: InputEventRaw = unsafe { mem::zeroed() };
        unsafe {
            libc::gettimeofday(&mut event.time, std::ptr::null_mut());
        }
        event.type_ = type_;
        event.code = code;
        event.value = value;

        unsafe {
            let event_ptr = &event as *const InputEventRaw as *const libc::c_void;
            if libc::write(fd, event_ptr, mem::size_of::<InputEventRaw>()) < 0 {
                warn!("Failed to write event: {}", std::io::Error::last_os_error());
            }
        }
    }

    /// The forwarding loop. Runs on a blocking task until the shutdown flag
    /// is observed or the source dies, then releases the grab and destroys
    /// the sink. An unrequested exit records `Failed` so state queries do
    /// not keep reporting a dead session as injecting.
    fn forward_loop(
        device: String,
        mut source: evdev::Device,
        source_fd: RawFd,
        uinput_fd: RawFd,
        mapping: ResolvedMapping,
        shutdown: Arc<AtomicBool>,
        state: Arc<RwLock<InjectorState>>,
    ) {
        info!("Injection running for \"{}\"", device);

        while !shutdown.load(Ordering::SeqCst) {
            let mut poll_fd = libc::pollfd {
                fd: source_fd,
                events: libc::POLLIN,
                revents: 0,
            };
            let ready = unsafe { libc::poll(&mut poll_fd, 1, POLL_INTERVAL_MS) };
            if ready < 0 {
                error!(
                    "poll failed for \"{}\": {}",
                    device,
                    std::io::Error::last_os_error()
                );
                break;
            }
            if ready == 0 {
                continue; // timeout, recheck the shutdown flag
            }

            let events = match source.fetch_events() {
                Ok(events) => events,
                Err(e) => {
                    error!("Reading from \"{}\" failed: {}", device, e);
                    break;
                }
            };

            for event in events {
                let ev_type = event.event_type().0;
                let code = event.code();
                let value = event.value();

                match decide(&mapping, ev_type, code, value) {
                    EventAction::Pass => Self::write_event(uinput_fd, ev_type, code, value),
                    EventAction::Remap(target) => {
                        debug!("Remapping {} -> {} (value {})", code, target, value);
                        Self::write_event(uinput_fd, ev_type, target, value);
                    }
                    EventAction::Discard => {
                        debug!("Discarding disabled key {}", code);
                    }
                }
            }
            Self::write_event(uinput_fd, EV_SYN, SYN_REPORT, 0);
        }

        unsafe {
            libc::ioctl(source_fd, EVIOCGRAB, 0 as libc::c_int);
            libc::ioctl(uinput_fd, UI_DEV_DESTROY);
            libc::close(uinput_fd);
        }

        if let Some(exit_state) = loop_exit_state(&shutdown) {
            warn!("Forwarding for \"{}\" died unexpectedly", device);
            *state.write().unwrap() = exit_state;
        }
        info!("Injection stopped for \"{}\"", device);
    }
}

#[async_trait::async_trait]
impl Injector for EvdevInjector {
    async fn start(&mut self) -> Result<(), InjectorError> {
        self.set_state(InjectorState::Starting);
        self.shutdown.store(false, Ordering::SeqCst);

        let source_path = match &self.source {
            Some(path) => path.clone(),
            None => {
                self.set_state(InjectorState::Failed);
                return Err(InjectorError::Start(format!(
                    "no event node known for device \"{}\"",
                    self.device
                )));
            }
        };

        let source = evdev::Device::open(&source_path).map_err(|e| {
            self.set_state(InjectorState::Failed);
            InjectorError::Start(format!("cannot open {}: {}", source_path.display(), e))
        })?;
        let source_fd = source.as_raw_fd();

        let grabbed = unsafe { libc::ioctl(source_fd, EVIOCGRAB, 1 as libc::c_int) };
        if grabbed < 0 {
            self.set_state(InjectorState::Failed);
            return Err(InjectorError::Start(format!(
                "EVIOCGRAB failed for {}: {}",
                source_path.display(),
                std::io::Error::last_os_error()
            )));
        }

        let uinput_fd = Self::create_uinput_device(&self.device, Path::new(UINPUT_PATH)).map_err(|e| {
            unsafe {
                libc::ioctl(source_fd, EVIOCGRAB, 0 as libc::c_int);
            }
            self.set_state(InjectorState::Failed);
            InjectorError::Start(e)
        })?;

        let device = self.device.clone();
        let mapping = self.mapping.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let state = Arc::clone(&self.state);
        // must precede the spawn; the loop may overwrite it with Failed
        self.set_state(InjectorState::Running);
        self.task = Some(tokio::task::spawn_blocking(move || {
            Self::forward_loop(device, source, source_fd, uinput_fd, mapping, shutdown, state);
        }));

        Ok(())
    }

    async fn stop(&mut self) -> Result<(), InjectorError> {
        if !self.state().is_alive() {
            debug!("Injector for \"{}\" already terminal", self.device);
            return Ok(());
        }

        self.set_state(InjectorState::Stopping);
        self.shutdown.store(true, Ordering::SeqCst);

        // Blocking wait for the forwarding task to confirm termination.
        // No timeout: a device must never be reported stopped while events
        // may still be in flight.
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                self.set_state(InjectorState::Stopped);
                return Err(InjectorError::Stop(e.to_string()));
            }
        }

        self.set_state(InjectorState::Stopped);
        Ok(())
    }

    fn state(&self) -> InjectorState {
        *self.state.read().unwrap()
    }
}

/// Factory for the production engine.
pub struct EvdevInjectorFactory;

impl InjectorFactory for EvdevInjectorFactory {
    fn create(
        &self,
        device: &str,
        source: Option<PathBuf>,
        mapping: ResolvedMapping,
    ) -> Box<dyn Injector> {
        Box::new(EvdevInjector::new(device, source, mapping))
    }
}
