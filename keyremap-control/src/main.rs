//! Control client binary for the keyremap daemon.

use async_trait::async_trait;
use clap::Parser;
use keyremap_common::ipc_client::IpcClient;
use keyremap_common::tracing;
use keyremap_common::{Request, Response};
use keyremap_control::{run, Command, ControlError, DaemonProxy};
use tracing::error;

/// Control ongoing key remapping injections
#[derive(Parser, Debug)]
#[command(name = "keyremap-control", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path of the daemon's control socket
    #[arg(long, value_name = "PATH")]
    socket: Option<String>,

    /// Config directory containing config.json and presets
    #[arg(long, value_name = "DIR")]
    config_dir: Option<String>,

    /// Print debug output
    #[arg(short, long)]
    debug: bool,
}

/// [`DaemonProxy`] over the daemon's Unix socket
struct IpcProxy {
    client: IpcClient,
}

impl IpcProxy {
    fn new(socket: Option<&str>) -> Self {
        let client = match socket {
            Some(path) => IpcClient::with_socket_path(path),
            None => IpcClient::new(),
        };
        Self { client }
    }

    async fn request(&self, request: Request) -> Result<Response, ControlError> {
        match self.client.send(&request).await? {
            Response::Error(message) => Err(ControlError::Daemon(message)),
            response => Ok(response),
        }
    }
}

#[async_trait]
impl DaemonProxy for IpcProxy {
    async fn start_injecting(
        &self,
        device: &str,
        preset_path: &str,
        config_dir: Option<&str>,
    ) -> Result<bool, ControlError> {
        match self
            .request(Request::StartInjecting {
                device: device.to_string(),
                preset_path: preset_path.to_string(),
                config_dir: config_dir.map(str::to_string),
            })
            .await?
        {
            Response::Started(started) => Ok(started),
            response => Err(ControlError::Daemon(format!(
                "unexpected response: {:?}",
                response
            ))),
        }
    }

    async fn stop_injecting(&self, device: &str) -> Result<(), ControlError> {
        self.request(Request::StopInjecting {
            device: device.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn get_state(&self, device: &str) -> Result<i32, ControlError> {
        match self
            .request(Request::GetState {
                device: device.to_string(),
            })
            .await?
        {
            Response::State(code) => Ok(code),
            response => Err(ControlError::Daemon(format!(
                "unexpected response: {:?}",
                response
            ))),
        }
    }

    async fn stop_all(&self) -> Result<(), ControlError> {
        self.request(Request::StopAll).await?;
        Ok(())
    }

    async fn hello(&self, payload: &str) -> Result<String, ControlError> {
        match self.request(Request::Hello(payload.to_string())).await? {
            Response::Hello(echo) => Ok(echo),
            response => Err(ControlError::Daemon(format!(
                "unexpected response: {:?}",
                response
            ))),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let proxy = IpcProxy::new(cli.socket.as_deref());

    if let Err(e) = run(cli.command, &proxy, cli.config_dir.as_deref()).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
