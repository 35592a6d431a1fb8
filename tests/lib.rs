//! Shared harness for the end-to-end tests.
//!
//! Spins up a real [`IpcServer`] and [`ControlService`] over a socket in a
//! temporary directory, with the evdev engine replaced by a stub so the
//! tests need neither hardware nor root.

use async_trait::async_trait;
use keyremap_common::ipc_client::IpcClient;
use keyremap_common::InjectorState;
use keyremapd::device::DeviceMonitor;
use keyremapd::injector::{Injector, InjectorError, InjectorFactory};
use keyremapd::ipc::IpcServer;
use keyremapd::preset::ResolvedMapping;
use keyremapd::service::ControlService;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::info;

/// Injector that tracks lifecycle state without touching any device.
pub struct StubInjector {
    state: InjectorState,
}

#[async_trait]
impl Injector for StubInjector {
    async fn start(&mut self) -> Result<(), InjectorError> {
        self.state = InjectorState::Running;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), InjectorError> {
        self.state = InjectorState::Stopped;
        Ok(())
    }

    fn state(&self) -> InjectorState {
        self.state
    }
}

pub struct StubFactory;

impl InjectorFactory for StubFactory {
    fn create(
        &self,
        _device: &str,
        _source: Option<PathBuf>,
        _mapping: ResolvedMapping,
    ) -> Box<dyn Injector> {
        Box::new(StubInjector {
            state: InjectorState::Unknown,
        })
    }
}

/// A daemon running against a temp directory, plus a client talking to it.
pub struct TestEnvironment {
    temp_dir: TempDir,
    server: IpcServer,
    pub client: IpcClient,
}

impl TestEnvironment {
    pub async fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let socket_path = temp_dir.path().join("test.sock");
        info!("Using test socket path: {:?}", socket_path);

        // Empty scan dir, so no real input devices leak into the tests
        let scan_dir = temp_dir.path().join("input");
        std::fs::create_dir_all(&scan_dir)?;

        let service = Arc::new(Mutex::new(ControlService::new(
            Arc::new(StubFactory),
            DeviceMonitor::with_scan_dir(&scan_dir),
        )));

        let mut server = IpcServer::new(&socket_path)?;
        server.start(service)?;

        let client = IpcClient::with_socket_path(&socket_path).with_timeout(2000);

        Ok(Self {
            temp_dir,
            server,
            client,
        })
    }

    /// Directory the daemon treats as the session config dir.
    pub fn config_dir(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }

    /// Write a preset file into the temp directory and return its path.
    pub fn write_preset(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(format!("{}.json", name));
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn shutdown(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.server.shutdown()
    }
}
