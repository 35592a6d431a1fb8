//! Keyremap daemon entry point.
//!
//! This is the privileged system daemon responsible for:
//! - Device discovery
//! - Per-device injection lifecycle management
//! - IPC communication with control clients

use keyremap_common::tracing;
use keyremapd::{device, injector, ipc, security, service};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    info!("Starting keyremap daemon v{}", env!("CARGO_PKG_VERSION"));

    // Grabbing event devices and creating uinput nodes needs root
    if !security::is_root() {
        error!("keyremapd must be started as root for device access");
        return Err("Insufficient privileges".into());
    }

    let socket_path = determine_socket_path()?;
    info!("Using socket path: {}", socket_path);

    let mut devices = device::DeviceMonitor::new();
    devices.refresh();

    let factory = Arc::new(injector::EvdevInjectorFactory);
    let service = Arc::new(Mutex::new(service::ControlService::new(factory, devices)));

    let mut ipc_server = ipc::IpcServer::new(&socket_path)?;
    ipc_server.start(Arc::clone(&service))?;
    info!("IPC server started successfully");

    if let Err(e) = security::set_socket_permissions(&socket_path) {
        warn!("Could not restrict socket permissions: {}", e);
    }

    // Set up signal handlers for graceful shutdown
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut interrupt = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        _ = terminate.recv() => {
            info!("Received SIGTERM, shutting down gracefully");
        }
        _ = interrupt.recv() => {
            info!("Received SIGINT, shutting down gracefully");
        }
    }

    // Stop all injections first so grabbed devices are released
    service.lock().await.stop().await;

    ipc_server.shutdown()?;
    info!("keyremap daemon shutdown complete");
    Ok(())
}

/// Determine the appropriate socket path based on the platform
fn determine_socket_path() -> Result<String, Box<dyn std::error::Error>> {
    // Created by RuntimeDirectory=keyremap in the service file
    let path = keyremap_common::ipc_client::DEFAULT_SOCKET_PATH.to_string();
    let dir = std::path::Path::new(&path)
        .parent()
        .ok_or("Socket path has no parent directory")?;
    std::fs::create_dir_all(dir)?;
    Ok(path)
}
