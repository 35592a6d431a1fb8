//! IPC client for communicating with the keyremap daemon
//!
//! Requests and responses travel over a Unix domain socket as
//! length-prefixed bincode frames, one request per connection, with
//! timeouts and reconnection logic on the client side.

use crate::{Request, Response};
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;

/// Errors that can occur during IPC communication
#[derive(Error, Debug)]
pub enum IpcError {
    #[error("failed to send request: {0}")]
    Send(io::Error),
    #[error("failed to receive response: {0}")]
    Receive(io::Error),
    #[error("serialization error: {0}")]
    Serialize(bincode::Error),
    #[error("deserialization error: {0}")]
    Deserialize(bincode::Error),
    #[error("connection timeout")]
    ConnectionTimeout,
    #[error("operation timeout after {0}ms")]
    OperationTimeout(u64),
    #[error("daemon not running at {0}")]
    DaemonNotRunning(String),
    #[error("message too large: {0} bytes exceeds maximum of {1} bytes")]
    MessageTooLarge(usize, usize),
    #[error("daemon reported error: {0}")]
    Daemon(String),
}

/// Default socket path for the keyremap daemon
pub const DEFAULT_SOCKET_PATH: &str = "/run/keyremap/keyremapd.sock";

/// Default timeout for operations (in milliseconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Maximum frame size (1MB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Maximum number of reconnection attempts
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay between reconnection attempts (in milliseconds)
pub const DEFAULT_RETRY_DELAY_MS: u64 = 250;

/// IPC client with connection management and error handling
#[derive(Debug)]
pub struct IpcClient {
    socket_path: String,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl IpcClient {
    /// Create a new IPC client with default settings
    pub fn new() -> Self {
        Self::with_socket_path(DEFAULT_SOCKET_PATH)
    }

    /// Create a new IPC client with a custom socket path
    pub fn with_socket_path<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_string_lossy().to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }

    /// Set the timeout for operations
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Duration::from_millis(timeout_ms);
        self
    }

    /// Set reconnection parameters
    pub fn with_retry_params(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = Duration::from_millis(retry_delay_ms);
        self
    }

    /// Check if the daemon is reachable at its socket
    pub async fn is_daemon_running(&self) -> bool {
        UnixStream::connect(&self.socket_path).await.is_ok()
    }

    /// Connect to the daemon with retry logic
    async fn connect(&self) -> Result<UnixStream, IpcError> {
        let mut attempts = 0;

        loop {
            match timeout(self.timeout, UnixStream::connect(&self.socket_path)).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => {
                    if attempts >= self.max_retries {
                        return Err(IpcError::DaemonNotRunning(self.socket_path.clone()));
                    }
                    tracing::warn!(
                        "Connection attempt {} failed: {}, retrying...",
                        attempts + 1,
                        e
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempts += 1;
                }
                Err(_) => return Err(IpcError::ConnectionTimeout),
            }
        }
    }

    /// Send a request to the daemon and wait for its response
    pub async fn send(&self, request: &Request) -> Result<Response, IpcError> {
        let mut stream = self.connect().await?;

        let serialized = bincode::serialize(request).map_err(IpcError::Serialize)?;
        if serialized.len() > MAX_MESSAGE_SIZE {
            return Err(IpcError::MessageTooLarge(serialized.len(), MAX_MESSAGE_SIZE));
        }

        // Frame: u32 little-endian length prefix, then the payload
        timeout(self.timeout, async {
            let len = serialized.len() as u32;
            stream.write_all(&len.to_le_bytes()).await?;
            stream.write_all(&serialized).await?;
            stream.flush().await?;
            Ok::<(), io::Error>(())
        })
        .await
        .map_err(|_| IpcError::OperationTimeout(self.timeout.as_millis() as u64))?
        .map_err(IpcError::Send)?;

        let payload = timeout(self.timeout, async {
            let mut len_bytes = [0u8; 4];
            stream.read_exact(&mut len_bytes).await?;
            let response_len = u32::from_le_bytes(len_bytes) as usize;
            if response_len > MAX_MESSAGE_SIZE {
                return Ok(Err(IpcError::MessageTooLarge(response_len, MAX_MESSAGE_SIZE)));
            }

            let mut buffer = vec![0u8; response_len];
            stream.read_exact(&mut buffer).await?;
            Ok::<_, io::Error>(Ok(buffer))
        })
        .await
        .map_err(|_| IpcError::OperationTimeout(self.timeout.as_millis() as u64))?
        .map_err(IpcError::Receive)??;

        bincode::deserialize(&payload).map_err(IpcError::Deserialize)
    }
}

impl Default for IpcClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{deserialize, serialize, InjectorState};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    /// Minimal daemon stand-in that answers every request with a fixed
    /// state response, speaking the real frame format.
    async fn mock_daemon(socket_path: &str) {
        let listener = UnixListener::bind(socket_path).unwrap();
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut len_buf = [0u8; 4];
                if stream.read_exact(&mut len_buf).await.is_err() {
                    return;
                }
                let msg_len = u32::from_le_bytes(len_buf) as usize;
                let mut msg_buf = vec![0u8; msg_len];
                if stream.read_exact(&mut msg_buf).await.is_err() {
                    return;
                }

                let request: Request = match deserialize(&msg_buf) {
                    Ok(req) => req,
                    Err(_) => return,
                };

                let response = match request {
                    Request::Hello(payload) => Response::Hello(payload),
                    Request::GetState { .. } => Response::State(InjectorState::Unknown.code()),
                    _ => Response::Ack,
                };

                let bytes = serialize(&response);
                let len = bytes.len() as u32;
                let _ = stream.write_all(&len.to_le_bytes()).await;
                let _ = stream.write_all(&bytes).await;
                let _ = stream.flush().await;
            });
        }
    }

    #[tokio::test]
    async fn test_client_builder() {
        let client = IpcClient::with_socket_path("/tmp/test.sock")
            .with_timeout(10000)
            .with_retry_params(5, 2000);

        assert_eq!(client.socket_path, "/tmp/test.sock");
        assert_eq!(client.timeout, Duration::from_millis(10000));
        assert_eq!(client.max_retries, 5);
        assert_eq!(client.retry_delay, Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_hello_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let socket_str = socket_path.to_string_lossy().to_string();

        let server_path = socket_str.clone();
        tokio::spawn(async move { mock_daemon(&server_path).await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = IpcClient::with_socket_path(&socket_str);
        assert!(client.is_daemon_running().await);

        let response = client
            .send(&Request::Hello("hello daemon".to_string()))
            .await
            .unwrap();
        match response {
            Response::Hello(payload) => assert_eq!(payload, "hello daemon"),
            other => panic!("unexpected response: {:?}", other),
        }

        let response = client
            .send(&Request::GetState {
                device: "device 1234".to_string(),
            })
            .await
            .unwrap();
        assert!(matches!(response, Response::State(-1)));
    }

    #[tokio::test]
    async fn test_daemon_not_running() {
        let client = IpcClient::with_socket_path("/tmp/keyremap-nonexistent.sock")
            .with_timeout(100)
            .with_retry_params(1, 50);

        match client.send(&Request::StopAll).await {
            Err(IpcError::DaemonNotRunning(_)) | Err(IpcError::ConnectionTimeout) => {}
            other => panic!("expected connection failure, got {:?}", other),
        }
    }
}
