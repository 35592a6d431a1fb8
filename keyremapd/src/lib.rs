//! Keyremap Daemon Library
//!
//! Core of the injection supervisor:
//! - Per-device injection lifecycle (registry + engine)
//! - Preset loading and keycode table maintenance
//! - Device enumeration
//! - IPC communication with control clients

use std::path::PathBuf;
use thiserror::Error;

pub mod device;
pub mod injector;
pub mod ipc;
pub mod keycodes;
pub mod preset;
pub mod registry;
pub mod security;
pub mod service;

// Re-export common types
pub use keyremap_common::{InjectorState, Request, Response};

/// Errors raised while servicing a start request.
///
/// All of these are recoverable from the daemon's perspective: they are
/// logged and reported to the caller as a boolean failure, never as a fault
/// across the IPC boundary.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("preset \"{0}\" does not exist")]
    PresetNotFound(PathBuf),

    #[error("invalid mapping: {0}")]
    InvalidMapping(String),

    #[error("could not start the injection engine: {0}")]
    EngineStartFailure(String),
}
