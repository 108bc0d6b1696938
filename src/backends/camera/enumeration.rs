// SPDX-License-Identifier: GPL-3.0-only

//! Camera discovery
//!
//! PipeWire cameras are listed through `pw-cli`; when that is unavailable a
//! single "default camera" entry lets `pipewiresrc` auto-select. V4L2
//! cameras are the capture nodes under `/dev`.

use super::types::{CameraBackendType, CameraDevice, CameraPosition};
use tracing::{debug, info, warn};
use v4l::capability::Flags;
use v4l::prelude::*;

/// Path prefix of PipeWire cameras addressed by object serial
pub const PIPEWIRE_SERIAL_PREFIX: &str = "pipewire-serial-";

/// Enumerate cameras for a GStreamer backend
pub fn enumerate(backend: CameraBackendType) -> Vec<CameraDevice> {
    match backend {
        CameraBackendType::PipeWire => enumerate_pipewire_cameras(),
        CameraBackendType::V4l2 => enumerate_v4l2_cameras(),
        CameraBackendType::Virtual => Vec::new(),
    }
}

/// Enumerate PipeWire video sources
pub fn enumerate_pipewire_cameras() -> Vec<CameraDevice> {
    debug!("Attempting to enumerate cameras via PipeWire");

    if let Some(cameras) = try_enumerate_with_pw_cli() {
        return cameras;
    }

    info!("Using PipeWire auto-selection (default camera)");
    vec![CameraDevice {
        name: "Default Camera (PipeWire)".to_string(),
        // Empty path = PipeWire auto-selects
        path: String::new(),
        position: None,
        v4l2_path: None,
    }]
}

fn try_enumerate_with_pw_cli() -> Option<Vec<CameraDevice>> {
    let output = std::process::Command::new("pw-cli")
        .args(["ls", "Node"])
        .output()
        .ok()?;

    if !output.status.success() {
        debug!("pw-cli command failed");
        return None;
    }

    let cameras = parse_pw_cli_nodes(&String::from_utf8_lossy(&output.stdout));
    if cameras.is_empty() {
        debug!("No cameras found via pw-cli");
        None
    } else {
        debug!(count = cameras.len(), "Enumerated cameras via pw-cli");
        Some(cameras)
    }
}

/// Properties of one `pw-cli ls Node` entry
#[derive(Default)]
struct NodeProps {
    id: Option<String>,
    serial: Option<String>,
    description: Option<String>,
    object_path: Option<String>,
    location: Option<String>,
    video_source: bool,
}

impl NodeProps {
    fn into_camera(self) -> Option<CameraDevice> {
        if !self.video_source {
            return None;
        }
        let name = self.description?;
        let path = match (self.serial, self.id) {
            (Some(serial), _) => format!("{}{}", PIPEWIRE_SERIAL_PREFIX, serial),
            (None, Some(id)) => format!("pipewire-{}", id),
            (None, None) => return None,
        };
        let v4l2_path = self
            .object_path
            .as_deref()
            .and_then(|p| p.strip_prefix("v4l2:"))
            .map(str::to_string);
        let position = self
            .location
            .as_deref()
            .and_then(CameraPosition::from_libcamera_location);

        debug!(name = %name, path = %path, ?position, "Found video camera");
        Some(CameraDevice {
            name,
            path,
            position,
            v4l2_path,
        })
    }
}

/// Parse the output of `pw-cli ls Node` into cameras
pub fn parse_pw_cli_nodes(stdout: &str) -> Vec<CameraDevice> {
    let mut cameras = Vec::new();
    let mut current: Option<NodeProps> = None;

    for line in stdout.lines() {
        let trimmed = line.trim();

        // "id 76, type PipeWire:Interface:Node/3"
        if let Some(rest) = trimmed.strip_prefix("id ")
            && trimmed.contains("type PipeWire:Interface:Node")
        {
            if let Some(camera) = current.take().and_then(NodeProps::into_camera) {
                cameras.push(camera);
            }
            current = Some(NodeProps {
                id: rest.split(',').next().map(|id| id.trim().to_string()),
                ..Default::default()
            });
            continue;
        }

        let Some(props) = current.as_mut() else {
            continue;
        };

        if trimmed.contains("media.class") && trimmed.contains("\"Video/Source\"") {
            props.video_source = true;
        } else if trimmed.contains("object.serial") {
            props.serial = extract_quoted_value(trimmed);
        } else if trimmed.contains("object.path") {
            props.object_path = extract_quoted_value(trimmed);
        } else if trimmed.contains("node.description") {
            props.description = extract_quoted_value(trimmed);
        } else if trimmed.contains("api.libcamera.location") {
            props.location = extract_quoted_value(trimmed);
        }
    }

    if let Some(camera) = current.and_then(NodeProps::into_camera) {
        cameras.push(camera);
    }
    cameras
}

/// Extract quoted value from a property line (e.g., 'property = "value"' -> "value")
fn extract_quoted_value(line: &str) -> Option<String> {
    let start = line.find('"')?;
    let end = line[start + 1..].find('"')?;
    Some(line[start + 1..start + 1 + end].to_string())
}

/// Enumerate V4L2 capture nodes
pub fn enumerate_v4l2_cameras() -> Vec<CameraDevice> {
    let mut cameras = Vec::new();

    for node in v4l::context::enum_devices() {
        let path = node.path().to_string_lossy().to_string();
        let device = match Device::with_path(node.path()) {
            Ok(device) => device,
            Err(e) => {
                debug!(path = %path, error = %e, "Cannot open V4L2 node");
                continue;
            }
        };
        let caps = match device.query_caps() {
            Ok(caps) => caps,
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to query V4L2 capabilities");
                continue;
            }
        };
        // Metadata nodes share the card name, skip everything that can't capture
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }

        let name = node.name().unwrap_or_else(|| caps.card.clone());
        debug!(path = %path, name = %name, driver = %caps.driver, "Found V4L2 camera");
        cameras.push(CameraDevice {
            name,
            path: path.clone(),
            position: None,
            v4l2_path: Some(path),
        });
    }

    cameras.sort_by(|a, b| a.path.cmp(&b.path));
    cameras
}
