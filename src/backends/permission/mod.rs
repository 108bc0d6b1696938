// SPDX-License-Identifier: GPL-3.0-only

//! Camera permission authorities
//!
//! Sandboxed (Flatpak) builds ask xdg-desktop-portal for camera access.
//! Host builds talk to the devices directly, so the only "permission" is
//! whether the user can open the V4L2 nodes.

pub mod device;
pub mod portal;

pub use device::DeviceNodeAuthority;
pub use portal::PortalAuthority;

use crate::scanner::types::AuthorizationStatus;
use std::future::Future;
use tracing::info;

/// Source of truth for camera access
pub trait PermissionAuthority: Send + Sync + 'static {
    /// Current authorization without prompting
    fn current_status(&self) -> AuthorizationStatus;

    /// Prompt the user (if the platform has a prompt) and report the answer
    fn request_access(&self) -> impl Future<Output = bool> + Send;
}

/// Authority chosen for the running environment
#[derive(Debug, Clone)]
pub enum SystemAuthority {
    Portal(PortalAuthority),
    DeviceNodes(DeviceNodeAuthority),
    /// No camera hardware involved (virtual camera)
    AlwaysGranted,
}

impl SystemAuthority {
    /// Pick the portal inside a sandbox and device nodes otherwise
    pub fn detect() -> Self {
        if let Some(app_id) = portal::sandbox_app_id() {
            info!(app_id = %app_id, "Running sandboxed, using camera portal");
            SystemAuthority::Portal(PortalAuthority::new(app_id))
        } else {
            info!("Running on host, checking device node access");
            SystemAuthority::DeviceNodes(DeviceNodeAuthority::default())
        }
    }
}

impl PermissionAuthority for SystemAuthority {
    fn current_status(&self) -> AuthorizationStatus {
        match self {
            SystemAuthority::Portal(portal) => portal.current_status(),
            SystemAuthority::DeviceNodes(nodes) => nodes.current_status(),
            SystemAuthority::AlwaysGranted => AuthorizationStatus::Authorized,
        }
    }

    async fn request_access(&self) -> bool {
        match self {
            SystemAuthority::Portal(portal) => portal.request_access().await,
            SystemAuthority::DeviceNodes(nodes) => nodes.request_access().await,
            SystemAuthority::AlwaysGranted => true,
        }
    }
}
