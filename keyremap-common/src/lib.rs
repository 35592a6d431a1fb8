use serde::{Deserialize, Serialize};
use std::fmt;

// Re-export common dependencies
pub use bincode;
pub use serde;
pub use tokio;
pub use tracing;

// Session configuration shared by daemon and control tool
pub mod config;
// IPC client module
pub mod ipc_client;
// User path resolution for the calling session
pub mod paths;

/// Lifecycle state of an injection session, as reported by the injector
/// that owns it. Sent over IPC as the raw integer code.
///
/// `Unknown` is the "no session registered" sentinel. Callers must treat it
/// as "not running", never as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum InjectorState {
    Unknown = -1,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
    Failed = 5,
}

impl InjectorState {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => InjectorState::Starting,
            2 => InjectorState::Running,
            3 => InjectorState::Stopping,
            4 => InjectorState::Stopped,
            5 => InjectorState::Failed,
            _ => InjectorState::Unknown,
        }
    }

    /// Whether an injector in this state still controls the device.
    pub fn is_alive(self) -> bool {
        matches!(
            self,
            InjectorState::Starting | InjectorState::Running | InjectorState::Stopping
        )
    }
}

impl fmt::Display for InjectorState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            InjectorState::Unknown => "unknown",
            InjectorState::Starting => "starting",
            InjectorState::Running => "running",
            InjectorState::Stopping => "stopping",
            InjectorState::Stopped => "stopped",
            InjectorState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// IPC requests from control clients to the daemon.
///
/// These enums are the interface definition: both ends compile against the
/// same variants, so a signature mismatch is a build error rather than a
/// runtime surprise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Start injecting a preset for a device.
    ///
    /// `preset_path` must be absolute. The daemon has no knowledge of the
    /// calling user's home directory, so the caller resolves paths before
    /// sending. `config_dir`, when present, points at the session's config
    /// directory containing `config.json` and `xmodmap.json`.
    StartInjecting {
        device: String,
        preset_path: String,
        config_dir: Option<String>,
    },

    /// Stop injecting for a single device. A no-op if none is running.
    StopInjecting { device: String },

    /// Query the injection state for a device.
    GetState { device: String },

    /// Stop every running injection.
    StopAll,

    /// Echo the payload back. Lets a caller verify the channel is alive.
    Hello(String),
}

/// IPC responses from the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Outcome of `StartInjecting`. `false` is a reportable, recoverable
    /// condition (missing preset, engine failure), not a fault.
    Started(bool),

    /// Acknowledgment of `StopInjecting` / `StopAll`.
    Ack,

    /// Integer state code for `GetState` (see [`InjectorState`]).
    State(i32),

    /// Echoed `Hello` payload.
    Hello(String),

    /// Transport-level error. Registry and session errors never surface
    /// here; they are folded into `Started(false)` or logged.
    Error(String),
}

/// Serialization helpers for the IPC protocol
pub fn serialize<T: Serialize>(msg: &T) -> Vec<u8> {
    bincode::serialize(msg).unwrap_or_else(|e| {
        tracing::error!("Failed to serialize message: {:?}", e);
        Vec::new()
    })
}

pub fn deserialize<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, bincode::Error> {
    bincode::deserialize(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let request = Request::StartInjecting {
            device: "device 1234".to_string(),
            preset_path: "/home/user/.config/keyremap/presets/device 1234/a.json".to_string(),
            config_dir: Some("/home/user/.config/keyremap".to_string()),
        };
        let serialized = serialize(&request);
        let deserialized: Request = deserialize(&serialized).unwrap();
        match deserialized {
            Request::StartInjecting {
                device, config_dir, ..
            } => {
                assert_eq!(device, "device 1234");
                assert!(config_dir.is_some());
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_state_codes() {
        assert_eq!(InjectorState::Unknown.code(), -1);
        assert_eq!(InjectorState::Running.code(), 2);
        assert_eq!(InjectorState::from_code(4), InjectorState::Stopped);
        // Anything unrecognized collapses to the sentinel
        assert_eq!(InjectorState::from_code(42), InjectorState::Unknown);
        assert!(InjectorState::Starting.is_alive());
        assert!(!InjectorState::Stopped.is_alive());
    }

    #[test]
    fn test_response_roundtrip() {
        let response = Response::State(InjectorState::Running.code());
        let serialized = serialize(&response);
        let deserialized: Response = deserialize(&serialized).unwrap();
        assert!(matches!(deserialized, Response::State(2)));
    }
}
