//! Command logic for the keyremap control client.
//!
//! The actual transport lives behind [`DaemonProxy`] so the command
//! handling can be exercised in tests without a running daemon.

use async_trait::async_trait;
use keyremap_common::config::{ConfigError, SessionConfig};
use keyremap_common::ipc_client::IpcError;
use keyremap_common::{paths, InjectorState};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Config directory does not exist: {0}")]
    ConfigDirMissing(PathBuf),

    #[error("Could not determine a config directory, pass --config-dir")]
    NoConfigDir,

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Daemon reported an error: {0}")]
    Daemon(String),

    #[error("Starting injection for \"{0}\" failed")]
    StartFailed(String),
}

/// Commands accepted by the control client
#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Start injecting a preset for a device
    Start {
        /// Device name as reported by the daemon
        device: String,
        /// Preset name, or a path to a preset file
        preset: String,
    },
    /// Stop the injection for a device
    Stop {
        /// Device name as reported by the daemon
        device: String,
    },
    /// Stop all ongoing injections
    StopAll,
    /// Print the injection state of a device
    State {
        /// Device name as reported by the daemon
        device: String,
    },
    /// Start injecting every autoload preset from the session config
    Autoload,
    /// Check that the daemon is reachable
    Hello,
}

/// Transport-agnostic view of the daemon's control surface
#[async_trait]
pub trait DaemonProxy: Send + Sync {
    async fn start_injecting(
        &self,
        device: &str,
        preset_path: &str,
        config_dir: Option<&str>,
    ) -> Result<bool, ControlError>;

    async fn stop_injecting(&self, device: &str) -> Result<(), ControlError>;

    async fn get_state(&self, device: &str) -> Result<i32, ControlError>;

    async fn stop_all(&self) -> Result<(), ControlError>;

    async fn hello(&self, payload: &str) -> Result<String, ControlError>;
}

/// Resolve the config directory, preferring an explicit override.
///
/// An explicitly named directory must exist; the default location may
/// be absent, the daemon degrades gracefully without it.
pub fn resolve_config_dir(config_dir: Option<&str>) -> Result<PathBuf, ControlError> {
    match config_dir {
        Some(dir) => {
            let dir = paths::expand(dir);
            if !dir.is_dir() {
                return Err(ControlError::ConfigDirMissing(dir));
            }
            Ok(dir)
        }
        None => paths::config_path().ok_or(ControlError::NoConfigDir),
    }
}

/// Turn a preset argument into an absolute preset file path.
///
/// Arguments containing a path separator are taken as file paths,
/// bare names are looked up under the config directory.
fn resolve_preset_path(config_dir: &Path, device: &str, preset: &str) -> PathBuf {
    if preset.contains('/') {
        paths::expand(preset)
    } else {
        paths::preset_path(config_dir, device, preset)
    }
}

/// Execute a command against the daemon.
pub async fn run(
    command: Command,
    proxy: &dyn DaemonProxy,
    config_dir: Option<&str>,
) -> Result<(), ControlError> {
    let config_dir = resolve_config_dir(config_dir)?;
    let config_dir_arg = config_dir.to_string_lossy().to_string();

    match command {
        Command::Start { device, preset } => {
            let preset_path = resolve_preset_path(&config_dir, &device, &preset);
            let started = proxy
                .start_injecting(
                    &device,
                    &preset_path.to_string_lossy(),
                    Some(&config_dir_arg),
                )
                .await?;
            if !started {
                return Err(ControlError::StartFailed(device));
            }
            info!("Started injecting for \"{}\"", device);
        }
        Command::Stop { device } => {
            proxy.stop_injecting(&device).await?;
        }
        Command::StopAll => {
            proxy.stop_all().await?;
        }
        Command::State { device } => {
            let code = proxy.get_state(&device).await?;
            println!("{}", InjectorState::from_code(code));
        }
        Command::Autoload => {
            let config = SessionConfig::load_dir(&config_dir)?;
            // Drop whatever is currently running before rehydrating
            proxy.stop_all().await?;
            for (device, preset) in config.iterate_autoload_presets() {
                let preset_path = resolve_preset_path(&config_dir, &device, &preset);
                let started = proxy
                    .start_injecting(
                        &device,
                        &preset_path.to_string_lossy(),
                        Some(&config_dir_arg),
                    )
                    .await?;
                if started {
                    info!("Started injecting for \"{}\"", device);
                } else {
                    warn!("Could not start injecting for \"{}\"", device);
                }
            }
        }
        Command::Hello => {
            let echo = proxy.hello("hello").await?;
            println!("{}", echo);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    struct RecordingProxy {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingProxy {
        fn new() -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DaemonProxy for RecordingProxy {
        async fn start_injecting(
            &self,
            device: &str,
            preset_path: &str,
            _config_dir: Option<&str>,
        ) -> Result<bool, ControlError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("start:{}:{}", device, preset_path));
            Ok(true)
        }

        async fn stop_injecting(&self, device: &str) -> Result<(), ControlError> {
            self.calls.lock().unwrap().push(format!("stop:{}", device));
            Ok(())
        }

        async fn get_state(&self, device: &str) -> Result<i32, ControlError> {
            self.calls.lock().unwrap().push(format!("state:{}", device));
            Ok(InjectorState::Unknown.code())
        }

        async fn stop_all(&self) -> Result<(), ControlError> {
            self.calls.lock().unwrap().push("stop_all".to_string());
            Ok(())
        }

        async fn hello(&self, payload: &str) -> Result<String, ControlError> {
            self.calls.lock().unwrap().push(format!("hello:{}", payload));
            Ok(payload.to_string())
        }
    }

    #[tokio::test]
    async fn test_start_builds_preset_path_from_name() {
        let config_dir = TempDir::new().unwrap();
        let proxy = RecordingProxy::new();

        run(
            Command::Start {
                device: "device 1234".to_string(),
                preset: "preset".to_string(),
            },
            &proxy,
            Some(&config_dir.path().to_string_lossy()),
        )
        .await
        .unwrap();

        let expected = config_dir
            .path()
            .join("presets")
            .join("device 1234")
            .join("preset.json");
        assert_eq!(
            proxy.calls(),
            vec![format!("start:device 1234:{}", expected.display())]
        );
    }

    #[tokio::test]
    async fn test_start_accepts_preset_file_path() {
        let config_dir = TempDir::new().unwrap();
        let proxy = RecordingProxy::new();

        run(
            Command::Start {
                device: "device 1234".to_string(),
                preset: "/tmp/somewhere/preset.json".to_string(),
            },
            &proxy,
            Some(&config_dir.path().to_string_lossy()),
        )
        .await
        .unwrap();

        assert_eq!(
            proxy.calls(),
            vec!["start:device 1234:/tmp/somewhere/preset.json".to_string()]
        );
    }

    #[tokio::test]
    async fn test_missing_config_dir_is_rejected() {
        let proxy = RecordingProxy::new();

        let result = run(
            Command::StopAll,
            &proxy,
            Some("/tmp/keyremap-test-does-not-exist"),
        )
        .await;

        assert!(matches!(result, Err(ControlError::ConfigDirMissing(_))));
        assert!(proxy.calls().is_empty());
    }

    #[tokio::test]
    async fn test_autoload_stops_once_then_starts_each_entry() {
        let config_dir = TempDir::new().unwrap();
        let mut config = SessionConfig::default();
        config.set_autoload_preset("device 1", "preset a");
        config.set_autoload_preset("device 2", "preset b");
        config
            .save(&config_dir.path().join("config.json"))
            .unwrap();

        let proxy = RecordingProxy::new();
        run(
            Command::Autoload,
            &proxy,
            Some(&config_dir.path().to_string_lossy()),
        )
        .await
        .unwrap();

        let calls = proxy.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], "stop_all");
        assert!(calls[1].starts_with("start:device 1:"));
        assert!(calls[1].ends_with("presets/device 1/preset a.json"));
        assert!(calls[2].starts_with("start:device 2:"));
        assert!(calls[2].ends_with("presets/device 2/preset b.json"));
    }

    #[tokio::test]
    async fn test_hello_roundtrip() {
        let config_dir = TempDir::new().unwrap();
        let proxy = RecordingProxy::new();

        run(
            Command::Hello,
            &proxy,
            Some(&config_dir.path().to_string_lossy()),
        )
        .await
        .unwrap();

        assert_eq!(proxy.calls(), vec!["hello:hello".to_string()]);
    }
}
