//! Privilege checks and socket access control.

use nix::unistd::{getuid, Group};
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use tracing::{debug, info};

/// Group that is allowed to talk to the control socket
const SOCKET_GROUP: &str = "input";

/// Whether the current process is running as root
pub fn is_root() -> bool {
    getuid().is_root()
}

/// Enforce socket ownership: group "input", mode 0660
///
/// This should be called after creating the Unix socket.
pub fn set_socket_permissions<P: AsRef<Path>>(
    socket_path: P,
) -> Result<(), Box<dyn std::error::Error>> {
    let socket_path = socket_path.as_ref();

    if !socket_path.exists() {
        return Err(format!("Socket file does not exist: {}", socket_path.display()).into());
    }

    info!("Setting socket permissions: group={}, mode=0660", SOCKET_GROUP);

    let mut perms = fs::metadata(socket_path)?.permissions();
    perms.set_mode(0o660);
    fs::set_permissions(socket_path, perms)?;

    set_socket_group(socket_path, SOCKET_GROUP)?;

    Ok(())
}

/// Set the group ownership of a file
fn set_socket_group<P: AsRef<Path>>(
    path: P,
    group_name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = path.as_ref();

    let group = Group::from_name(group_name)?
        .ok_or_else(|| format!("Group '{}' not found", group_name))?;

    let metadata = fs::metadata(path)?;
    let uid = metadata.uid();
    let gid = group.gid;

    let path_c = std::ffi::CString::new(path.to_string_lossy().as_bytes())?;
    unsafe {
        if libc::chown(path_c.as_ptr(), uid, gid.as_raw()) != 0 {
            return Err(format!(
                "Failed to change group ownership: {}",
                std::io::Error::last_os_error()
            )
            .into());
        }
    }

    debug!("Set group of {} to {} (gid={})", path.display(), group_name, gid);
    Ok(())
}
