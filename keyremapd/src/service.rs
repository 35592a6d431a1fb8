//! The IPC-facing control façade.
//!
//! Translates remote calls into registry operations and repairs the
//! process's view of session-scoped configuration. The daemon may not have
//! any knowledge about the logged in user, so it cannot read config files
//! on its own authority; callers supply their session's config directory
//! and the service rehydrates from it on every start request.

use crate::device::DeviceMonitor;
use crate::injector::InjectorFactory;
use crate::keycodes::KeycodeMap;
use crate::preset::Preset;
use crate::registry::InjectionRegistry;
use keyremap_common::config::SessionConfig;
use keyremap_common::InjectorState;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Session-specific symbolic-name -> keycode dump within the config dir.
pub const XMODMAP_FILE_NAME: &str = "xmodmap.json";

pub struct ControlService {
    registry: InjectionRegistry,
    keycodes: KeycodeMap,
    config: SessionConfig,
    devices: DeviceMonitor,
}

impl ControlService {
    pub fn new(factory: Arc<dyn InjectorFactory>, devices: DeviceMonitor) -> Self {
        Self {
            registry: InjectionRegistry::new(factory),
            keycodes: KeycodeMap::populated(),
            config: SessionConfig::default(),
            devices,
        }
    }

    /// Start injecting the preset for the device. Returns true on success.
    ///
    /// `preset_path` must be absolute; the daemon performs no path
    /// resolution. `config_dir`, when supplied, names the calling session's
    /// config directory; the global config and the session's xmodmap dump
    /// are rehydrated from it. A missing config file degrades the call
    /// (stale configuration keeps working) rather than failing it; a
    /// missing preset is a reportable failure, not a fault.
    pub async fn start_injecting(
        &mut self,
        device: &str,
        preset_path: &str,
        config_dir: Option<&str>,
    ) -> bool {
        // reload the config, since it may have been changed
        if let Some(dir) = config_dir {
            match SessionConfig::load_dir(Path::new(dir)) {
                Ok(config) => self.config = config,
                Err(e) => error!("{}", e),
            }
        }

        if !self.devices.known(device) {
            debug!("Devices possibly outdated, refreshing");
            self.devices.refresh();
        }

        let preset = match Preset::load(Path::new(preset_path)) {
            Ok(preset) => preset,
            Err(e) => {
                error!("{}", e);
                return false;
            }
        };

        // Dump of the session's xkb mappings, to resolve symbols in the
        // user's actual layout. The daemon cannot run `xmodmap -pke`
        // because it has no session, so the caller dumps it to a file.
        if let Some(dir) = config_dir {
            let xmodmap_path = Path::new(dir).join(XMODMAP_FILE_NAME);
            match std::fs::read_to_string(&xmodmap_path) {
                Ok(content) => match serde_json::from_str::<HashMap<String, i32>>(&content) {
                    Ok(overrides) => {
                        debug!("Using keycodes from {}", xmodmap_path.display());
                        self.keycodes.update(&overrides);
                    }
                    Err(e) => error!("Could not parse {}: {}", xmodmap_path.display(), e),
                },
                Err(_) => error!("Could not find {}", xmodmap_path.display()),
            }
        }

        let mapping = preset.resolve(&self.keycodes);
        let source = self.devices.path_of(device);
        match self.registry.start(device, source, mapping).await {
            Ok(()) => true,
            Err(e) => {
                error!("Starting injection for \"{}\" failed: {}", device, e);
                false
            }
        }
    }

    /// Stop injecting the mapping for a single device.
    pub async fn stop_injecting(&mut self, device: &str) {
        self.registry.stop(device).await;
    }

    /// Get the live injection state for a device. `Unknown` when absent.
    pub fn get_state(&self, device: &str) -> InjectorState {
        self.registry.state(device)
    }

    /// Stop all injections. Best-effort; used for service shutdown.
    pub async fn stop(&mut self) {
        let failures = self.registry.stop_all().await;
        if failures > 0 {
            warn!("{} injection(s) did not stop cleanly", failures);
        }
    }

    /// Echo the payload. Lets callers verify the channel is alive.
    pub fn hello(&self, payload: &str) -> String {
        info!("Received \"{}\" from client", payload);
        payload.to_string()
    }

    /// The process-wide keycode table.
    pub fn keycodes(&self) -> &KeycodeMap {
        &self.keycodes
    }
}
