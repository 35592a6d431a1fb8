use evdev::Device as EvdevDevice;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Information about a connected input device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub path: PathBuf,
}

/// Keeps the daemon's view of the machine's input devices.
///
/// Devices are keyed by their reported name, which is also the identifier
/// callers use over IPC. The view can go stale (devices appear after the
/// daemon started), so the service refreshes it whenever a start request
/// names a device it does not know.
pub struct DeviceMonitor {
    scan_dir: PathBuf,
    devices: HashMap<String, DeviceInfo>,
}

impl DeviceMonitor {
    pub fn new() -> Self {
        Self::with_scan_dir("/dev/input")
    }

    /// Scan a custom directory. Used by tests with an empty temp dir.
    pub fn with_scan_dir<P: AsRef<Path>>(scan_dir: P) -> Self {
        Self {
            scan_dir: scan_dir.as_ref().to_path_buf(),
            devices: HashMap::new(),
        }
    }

    /// Rescan for input devices, replacing the current view.
    pub fn refresh(&mut self) {
        debug!("Scanning {} for input devices", self.scan_dir.display());
        self.devices.clear();

        let entries = match fs::read_dir(&self.scan_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot scan {}: {}", self.scan_dir.display(), e);
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if !file_name.starts_with("event") {
                continue;
            }
            match Self::read_device_info(&path) {
                Ok(device) => {
                    debug!("Found device: {} at {}", device.name, path.display());
                    self.devices.insert(device.name.clone(), device);
                }
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                }
            }
        }

        info!("Discovered {} input devices", self.devices.len());
    }

    fn read_device_info(path: &Path) -> Result<DeviceInfo, std::io::Error> {
        let device = EvdevDevice::open(path)?;
        Ok(DeviceInfo {
            name: device.name().unwrap_or("Unknown Device").to_string(),
            path: path.to_path_buf(),
        })
    }

    /// Whether a device with this name is in the current view.
    pub fn known(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    /// Event node path for a device name, if present.
    pub fn path_of(&self, name: &str) -> Option<PathBuf> {
        self.devices.get(name).map(|d| d.path.clone())
    }
}

impl Default for DeviceMonitor {
    fn default() -> Self {
        Self::new()
    }
}
