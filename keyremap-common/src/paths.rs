//! User path resolution for the calling session.
//!
//! The daemon runs outside any user session and performs no path resolution
//! of its own. The control tool is the component that knows the user, so it
//! resolves `~` and relative paths here before anything crosses the IPC
//! boundary.

use std::path::{Path, PathBuf};

/// Name of the per-user configuration directory under `~/.config`.
pub const CONFIG_DIR_NAME: &str = "keyremap";

/// The session's configuration directory, e.g. `~/.config/keyremap`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME))
}

/// Path of a preset file for a device within a config directory.
pub fn preset_path(config_dir: &Path, device: &str, preset: &str) -> PathBuf {
    config_dir
        .join("presets")
        .join(device)
        .join(format!("{}.json", preset))
}

/// Expand a leading `~` and make the path absolute.
///
/// Relative paths are resolved against the current working directory without
/// touching the filesystem, so nonexistent paths still normalize.
pub fn expand(path: &str) -> PathBuf {
    let expanded = if let Some(rest) = path.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(path),
        }
    } else {
        PathBuf::from(path)
    };

    if expanded.is_absolute() {
        expanded
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(expanded),
            Err(_) => expanded,
        }
    }
}
