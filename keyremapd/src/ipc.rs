use crate::service::ControlService;
use keyremap_common::{deserialize, serialize, Request, Response};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio::task;
use tracing::{debug, error, info, warn};

/// Maximum accepted frame size (1MB)
const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// IPC server for handling communication with control clients.
///
/// Connections are accepted concurrently, but every request locks the one
/// [`ControlService`] for its whole duration, so calls are processed to
/// completion one at a time. That serialization is what makes the
/// registry's stop-old-then-install-new replacement atomic as observed by
/// `GetState` queries.
pub struct IpcServer {
    socket_path: String,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl IpcServer {
    /// Create a new IPC server with the specified socket path
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Result<Self, std::io::Error> {
        let path = socket_path.as_ref().to_string_lossy().to_string();

        // Remove any stale socket file from a previous run
        if Path::new(&path).exists() {
            std::fs::remove_file(&path)?;
        }

        Ok(Self {
            socket_path: path,
            shutdown_tx: None,
        })
    }

    /// Bind the socket and start serving requests against `service`.
    pub fn start(
        &mut self,
        service: Arc<Mutex<ControlService>>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        info!("Starting IPC server at {}", self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        task::spawn(async move {
            loop {
                tokio::select! {
                    connection = listener.accept() => {
                        match connection {
                            Ok((stream, _)) => {
                                debug!("New client connected");
                                let service = Arc::clone(&service);
                                task::spawn(async move {
                                    if let Err(e) = handle_client(stream, service).await {
                                        error!("Error handling client: {}", e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Error accepting connection: {}", e);
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("Shutting down IPC server");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    /// Shutdown the IPC server and remove the socket file
    pub fn shutdown(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Shutting down IPC server");

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if Path::new(&self.socket_path).exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        Ok(())
    }
}

/// Handle a client connection: one length-prefixed request, one response.
async fn handle_client(
    mut stream: UnixStream,
    service: Arc<Mutex<ControlService>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let msg_len = u32::from_le_bytes(len_buf) as usize;

    if msg_len > MAX_MESSAGE_SIZE {
        warn!("Received oversized message: {} bytes", msg_len);
        let response = Response::Error("message too large".to_string());
        return write_response(&mut stream, &response).await;
    }

    let mut msg_buf = vec![0u8; msg_len];
    stream.read_exact(&mut msg_buf).await?;

    let response = match deserialize::<Request>(&msg_buf) {
        Ok(request) => {
            debug!("Received request: {:?}", request);
            handle_request(request, service).await
        }
        Err(e) => {
            warn!("Undecodable request: {}", e);
            Response::Error("undecodable request".to_string())
        }
    };

    debug!("Sending response: {:?}", response);
    write_response(&mut stream, &response).await
}

async fn write_response(
    stream: &mut UnixStream,
    response: &Response,
) -> Result<(), Box<dyn std::error::Error>> {
    let response_bytes = serialize(response);
    let len = response_bytes.len() as u32;
    stream.write_all(&len.to_le_bytes()).await?;
    stream.write_all(&response_bytes).await?;
    stream.flush().await?;
    Ok(())
}

/// Process a request and generate a response.
///
/// Every request yields a well-formed response; registry and session
/// errors are folded into the boolean/sentinel results and never become
/// faults across the IPC boundary.
async fn handle_request(request: Request, service: Arc<Mutex<ControlService>>) -> Response {
    let mut service = service.lock().await;
    match request {
        Request::StartInjecting {
            device,
            preset_path,
            config_dir,
        } => {
            let started = service
                .start_injecting(&device, &preset_path, config_dir.as_deref())
                .await;
            Response::Started(started)
        }
        Request::StopInjecting { device } => {
            service.stop_injecting(&device).await;
            Response::Ack
        }
        Request::GetState { device } => Response::State(service.get_state(&device).code()),
        Request::StopAll => {
            service.stop().await;
            Response::Ack
        }
        Request::Hello(payload) => Response::Hello(service.hello(&payload)),
    }
}
