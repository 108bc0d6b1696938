// SPDX-License-Identifier: GPL-3.0-only

//! Host camera access
//!
//! Without a sandbox there is no prompt: access is granted when the user may
//! open at least one video node (usually via the `video` group).

use super::PermissionAuthority;
use crate::scanner::types::AuthorizationStatus;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Checks read/write access to `/dev/video*`
#[derive(Debug, Clone)]
pub struct DeviceNodeAuthority {
    dev_dir: PathBuf,
}

impl Default for DeviceNodeAuthority {
    fn default() -> Self {
        Self::new("/dev")
    }
}

impl DeviceNodeAuthority {
    /// Look for video nodes in `dev_dir`
    pub fn new(dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            dev_dir: dev_dir.into(),
        }
    }

    fn video_nodes(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.dev_dir) else {
            return Vec::new();
        };
        let mut nodes: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("video"))
            })
            .collect();
        nodes.sort();
        nodes
    }

    fn status(&self) -> AuthorizationStatus {
        let nodes = self.video_nodes();
        if nodes.is_empty() {
            // PipeWire may still expose cameras (e.g. libcamera), let the session decide
            debug!(dir = %self.dev_dir.display(), "No video nodes found");
            return AuthorizationStatus::Authorized;
        }

        if nodes.iter().any(|node| can_open(node)) {
            AuthorizationStatus::Authorized
        } else {
            debug!(count = nodes.len(), "No accessible video node");
            AuthorizationStatus::Restricted
        }
    }
}

fn can_open(path: &Path) -> bool {
    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: c_path is a valid NUL-terminated string
    unsafe { libc::access(c_path.as_ptr(), libc::R_OK | libc::W_OK) == 0 }
}

impl PermissionAuthority for DeviceNodeAuthority {
    fn current_status(&self) -> AuthorizationStatus {
        self.status()
    }

    async fn request_access(&self) -> bool {
        // Nothing to prompt, the answer is whatever the filesystem says
        self.status() == AuthorizationStatus::Authorized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_dir_defers_to_session() {
        let dir = tempfile::tempdir().unwrap();
        let authority = DeviceNodeAuthority::new(dir.path());
        assert_eq!(authority.current_status(), AuthorizationStatus::Authorized);
    }

    #[test]
    fn test_accessible_node_is_authorized() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("video0"), b"").unwrap();
        std::fs::write(dir.path().join("null"), b"").unwrap();
        let authority = DeviceNodeAuthority::new(dir.path());
        assert_eq!(authority.video_nodes().len(), 1);
        assert_eq!(authority.current_status(), AuthorizationStatus::Authorized);
        assert!(pollster::block_on(authority.request_access()));
    }
}
