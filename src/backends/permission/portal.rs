// SPDX-License-Identifier: GPL-3.0-only

//! xdg-desktop-portal camera access
//!
//! Inside a Flatpak sandbox the camera is only reachable after the Camera
//! portal granted access. The stored decision is read from the portal's
//! permission store; asking goes through `AccessCamera`, whose answer arrives
//! as a `Response` signal on a request object.

use super::PermissionAuthority;
use crate::constants::{dbus, timing};
use crate::scanner::types::AuthorizationStatus;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};

/// Flatpak metadata file present in every sandbox
const FLATPAK_INFO: &str = "/.flatpak-info";

/// App id of the sandbox we run in, `None` on the host
pub fn sandbox_app_id() -> Option<String> {
    if let Ok(id) = std::env::var("FLATPAK_ID")
        && !id.is_empty()
    {
        return Some(id);
    }

    if !Path::new(FLATPAK_INFO).exists() {
        return None;
    }

    let info = std::fs::read_to_string(FLATPAK_INFO).unwrap_or_default();
    Some(parse_flatpak_app_id(&info).unwrap_or_else(|| crate::constants::APP_ID.to_string()))
}

/// Read `name=` from the `[Application]` group of `.flatpak-info`
fn parse_flatpak_app_id(info: &str) -> Option<String> {
    let mut in_application = false;
    for line in info.lines().map(str::trim) {
        if line.starts_with('[') {
            in_application = line == "[Application]";
            continue;
        }
        if in_application && let Some(name) = line.strip_prefix("name=") {
            return Some(name.trim().to_string());
        }
    }
    None
}

/// Object path the portal uses for a request made by `sender` with `token`
fn request_path(sender: &str, token: &str) -> String {
    let sender = sender.trim_start_matches(':').replace('.', "_");
    format!("{}/request/{}/{}", dbus::PORTAL_OBJECT_PATH, sender, token)
}

/// Map permission store values to a status
fn status_from_store(values: Option<&Vec<String>>) -> AuthorizationStatus {
    match values.and_then(|v| v.first()).map(String::as_str) {
        Some("yes") => AuthorizationStatus::Authorized,
        Some("no") => AuthorizationStatus::Denied,
        _ => AuthorizationStatus::NotDetermined,
    }
}

/// Camera portal client
#[derive(Debug, Clone)]
pub struct PortalAuthority {
    app_id: String,
}

impl PortalAuthority {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Look up the stored camera decision for this app
    async fn lookup(&self) -> Result<AuthorizationStatus, String> {
        let connection = zbus::Connection::session()
            .await
            .map_err(|e| format!("Failed to connect to session D-Bus: {}", e))?;

        let store = zbus::Proxy::new(
            &connection,
            dbus::PERMISSION_STORE_BUS_NAME,
            dbus::PERMISSION_STORE_PATH,
            dbus::PERMISSION_STORE_BUS_NAME,
        )
        .await
        .map_err(|e| format!("Failed to create PermissionStore proxy: {}", e))?;

        let result: Result<(HashMap<String, Vec<String>>, OwnedValue), _> = store
            .call(
                "Lookup",
                &(dbus::PERMISSION_STORE_TABLE, dbus::PERMISSION_STORE_CAMERA_ID),
            )
            .await;

        match result {
            Ok((permissions, _data)) => Ok(status_from_store(permissions.get(&self.app_id))),
            // The table entry only exists once some app asked for the camera
            Err(zbus::Error::MethodError(name, _, _)) if name.as_str().ends_with("NotFound") => {
                Ok(AuthorizationStatus::NotDetermined)
            }
            Err(e) => Err(format!("PermissionStore lookup failed: {}", e)),
        }
    }

    /// Call `AccessCamera` and wait for the user's answer
    async fn access_camera(&self) -> Result<bool, String> {
        let connection = zbus::Connection::session()
            .await
            .map_err(|e| format!("Failed to connect to session D-Bus: {}", e))?;

        let sender = connection
            .unique_name()
            .map(|name| name.to_string())
            .ok_or_else(|| "Session bus connection has no unique name".to_string())?;
        let token = format!("qr_scanner_{}", uuid::Uuid::new_v4().simple());
        let path = request_path(&sender, &token);

        // Subscribe before calling so a fast answer is not missed
        let request = zbus::Proxy::new(
            &connection,
            dbus::PORTAL_BUS_NAME,
            path.as_str(),
            dbus::REQUEST_INTERFACE,
        )
        .await
        .map_err(|e| format!("Failed to create portal request proxy: {}", e))?;
        let mut responses = request
            .receive_signal("Response")
            .await
            .map_err(|e| format!("Failed to subscribe to portal response: {}", e))?;

        let camera = zbus::Proxy::new(
            &connection,
            dbus::PORTAL_BUS_NAME,
            dbus::PORTAL_OBJECT_PATH,
            dbus::CAMERA_INTERFACE,
        )
        .await
        .map_err(|e| format!("Failed to create camera portal proxy: {}", e))?;

        let mut options: HashMap<&str, Value> = HashMap::new();
        options.insert("handle_token", Value::new(token.as_str()));

        let handle: OwnedObjectPath = camera
            .call("AccessCamera", &(options,))
            .await
            .map_err(|e| format!("AccessCamera failed: {}", e))?;
        debug!(handle = %handle, expected = %path, "Camera access requested");

        let message =
            match tokio::time::timeout(timing::PORTAL_RESPONSE_TIMEOUT, responses.next()).await {
                Ok(Some(message)) => message,
                Ok(None) => return Err("Portal response stream ended".to_string()),
                Err(_) => return Err("Timed out waiting for portal response".to_string()),
            };

        let (response, _results): (u32, HashMap<String, OwnedValue>) = message
            .body()
            .deserialize()
            .map_err(|e| format!("Malformed portal response: {}", e))?;

        // 0 = granted, 1 = cancelled by user, 2 = other
        debug!(response, "Portal answered camera request");
        Ok(response == 0)
    }
}

impl PermissionAuthority for PortalAuthority {
    fn current_status(&self) -> AuthorizationStatus {
        match pollster::block_on(self.lookup()) {
            Ok(status) => status,
            Err(e) => {
                // Sandboxes without store access still get the portal prompt
                debug!(error = %e, "Camera permission lookup unavailable");
                AuthorizationStatus::NotDetermined
            }
        }
    }

    async fn request_access(&self) -> bool {
        match self.access_camera().await {
            Ok(granted) => {
                info!(granted, app_id = %self.app_id, "Camera portal request finished");
                granted
            }
            Err(e) => {
                warn!(error = %e, "Camera portal request failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flatpak_app_id() {
        let info = "[Application]\nname=io.github.qr_scanner\n\n[Instance]\nname=other\n";
        assert_eq!(
            parse_flatpak_app_id(info).as_deref(),
            Some("io.github.qr_scanner")
        );
        assert_eq!(parse_flatpak_app_id("[Instance]\nname=x\n"), None);
    }

    #[test]
    fn test_request_path_escapes_sender() {
        assert_eq!(
            request_path(":1.42", "tok"),
            "/org/freedesktop/portal/desktop/request/1_42/tok"
        );
    }

    #[test]
    fn test_status_from_store() {
        let yes = vec!["yes".to_string()];
        let no = vec!["no".to_string()];
        assert_eq!(status_from_store(Some(&yes)), AuthorizationStatus::Authorized);
        assert_eq!(status_from_store(Some(&no)), AuthorizationStatus::Denied);
        assert_eq!(status_from_store(None), AuthorizationStatus::NotDetermined);
    }
}
