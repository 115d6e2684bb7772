//! Launching the external mod-manager tool.

use std::path::Path;
use std::process::{Command, Stdio};

use tracing::info;

use crate::error::{Error, Result};

/// Spawns the mod-manager executable at `path` without waiting for it.
///
/// The child runs with its working directory set to the executable's parent,
/// so tools that look for data files next to themselves keep working.
pub fn launch_mod_manager(path: &Path) -> Result<u32> {
    if path.as_os_str().is_empty() {
        return Err(Error::Launch {
            path: path.to_path_buf(),
            message: "No mod manager path configured".to_string(),
        });
    }

    if !path.is_file() {
        return Err(Error::Launch {
            path: path.to_path_buf(),
            message: "Executable not found".to_string(),
        });
    }

    let mut command = Command::new(path);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        command.current_dir(parent);
    }

    let child = command.spawn().map_err(|e| Error::Launch {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    info!("Launched mod manager {} (pid {})", path.display(), child.id());
    Ok(child.id())
}
