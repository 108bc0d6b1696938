// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 zoom and focus controls
//!
//! Cameras exposing `V4L2_CID_ZOOM_ABSOLUTE` zoom in the sensor or lens,
//! which keeps full resolution for the decoder. Everything else falls back
//! to digital zoom in the capture session.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use tracing::{debug, warn};

const V4L2_CTRL_CLASS_CAMERA: u32 = 0x009a0000;
const V4L2_CID_CAMERA_CLASS_BASE: u32 = V4L2_CTRL_CLASS_CAMERA | 0x900;

/// Continuous autofocus enable
pub const V4L2_CID_FOCUS_AUTO: u32 = V4L2_CID_CAMERA_CLASS_BASE + 12;
/// Absolute zoom position (driver defined units)
pub const V4L2_CID_ZOOM_ABSOLUTE: u32 = V4L2_CID_CAMERA_CLASS_BASE + 13;

const V4L2_CTRL_FLAG_DISABLED: u32 = 0x0001;

// (dir << 30) | (size << 16) | ('V' << 8) | nr, dir 3 = READ|WRITE
/// Set control value (v4l2_control: 8 bytes)
const VIDIOC_S_CTRL: libc::c_ulong = 0xC008561C;
/// Query control info (v4l2_queryctrl: 68 bytes)
const VIDIOC_QUERYCTRL: libc::c_ulong = 0xC0445624;

#[repr(C)]
struct V4l2Control {
    id: u32,
    value: i32,
}

#[repr(C)]
struct V4l2Queryctrl {
    id: u32,
    ctrl_type: u32,
    name: [u8; 32],
    minimum: i32,
    maximum: i32,
    step: i32,
    default_value: i32,
    flags: u32,
    reserved: [u32; 2],
}

/// Range of an integer control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRange {
    pub minimum: i32,
    pub maximum: i32,
    pub step: i32,
}

/// Query the range of a control, `None` when missing or disabled
pub fn query_range(device_path: &str, control_id: u32) -> Option<ControlRange> {
    let file = File::open(device_path).ok()?;
    let fd = file.as_raw_fd();

    let mut qctrl = V4l2Queryctrl {
        id: control_id,
        ctrl_type: 0,
        name: [0; 32],
        minimum: 0,
        maximum: 0,
        step: 0,
        default_value: 0,
        flags: 0,
        reserved: [0; 2],
    };

    let result = unsafe { libc::ioctl(fd, VIDIOC_QUERYCTRL, &mut qctrl as *mut V4l2Queryctrl) };

    if result < 0 || qctrl.flags & V4L2_CTRL_FLAG_DISABLED != 0 {
        return None;
    }

    Some(ControlRange {
        minimum: qctrl.minimum,
        maximum: qctrl.maximum,
        step: qctrl.step.max(1),
    })
}

/// Set value of a control
pub fn set_control(device_path: &str, control_id: u32, value: i32) -> Result<(), String> {
    let file = File::open(device_path).map_err(|e| format!("Failed to open device: {}", e))?;
    let fd = file.as_raw_fd();

    let mut ctrl = V4l2Control {
        id: control_id,
        value,
    };

    let result = unsafe { libc::ioctl(fd, VIDIOC_S_CTRL, &mut ctrl as *mut V4l2Control) };

    if result < 0 {
        let errno = std::io::Error::last_os_error();
        warn!(
            device_path,
            control_id,
            value,
            ?errno,
            "Failed to set V4L2 control"
        );
        return Err(format!("Failed to set control: {}", errno));
    }

    Ok(())
}

/// Hardware zoom of one V4L2 device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoomControl {
    device_path: String,
    range: ControlRange,
}

impl ZoomControl {
    /// Look for a usable zoom control on `device_path`
    pub fn probe(device_path: &str) -> Option<Self> {
        let range = query_range(device_path, V4L2_CID_ZOOM_ABSOLUTE)?;
        if range.maximum <= range.minimum {
            return None;
        }
        debug!(
            device_path,
            min = range.minimum,
            max = range.maximum,
            "Hardware zoom available"
        );
        Some(Self {
            device_path: device_path.to_string(),
            range,
        })
    }

    /// Control value for `factor` in `1.0..=max_factor`, mapped linearly
    pub fn value_for(&self, factor: f32, max_factor: f32) -> i32 {
        let span = (max_factor - 1.0).max(f32::EPSILON);
        let t = ((factor - 1.0) / span).clamp(0.0, 1.0);
        let raw = self.range.minimum as f32 + t * (self.range.maximum - self.range.minimum) as f32;
        let steps = ((raw - self.range.minimum as f32) / self.range.step as f32).round() as i32;
        (self.range.minimum + steps * self.range.step).clamp(self.range.minimum, self.range.maximum)
    }

    pub fn apply(&self, factor: f32, max_factor: f32) -> Result<(), String> {
        let value = self.value_for(factor, max_factor);
        debug!(factor, value, "Applying hardware zoom");
        set_control(&self.device_path, V4L2_CID_ZOOM_ABSOLUTE, value)
    }
}

/// Turn on continuous autofocus when the device has it
pub fn enable_autofocus(device_path: &str) {
    if query_range(device_path, V4L2_CID_FOCUS_AUTO).is_none() {
        return;
    }
    if let Err(e) = set_control(device_path, V4L2_CID_FOCUS_AUTO, 1) {
        debug!(device_path, error = %e, "Autofocus not enabled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zoom(minimum: i32, maximum: i32, step: i32) -> ZoomControl {
        ZoomControl {
            device_path: String::new(),
            range: ControlRange {
                minimum,
                maximum,
                step,
            },
        }
    }

    #[test]
    fn test_control_id_values() {
        assert_eq!(V4L2_CID_FOCUS_AUTO, 0x009a090c);
        assert_eq!(V4L2_CID_ZOOM_ABSOLUTE, 0x009a090d);
    }

    #[test]
    fn test_zoom_maps_linearly() {
        let control = zoom(100, 500, 1);
        assert_eq!(control.value_for(1.0, 4.0), 100);
        assert_eq!(control.value_for(4.0, 4.0), 500);
        assert_eq!(control.value_for(2.5, 4.0), 300);
    }

    #[test]
    fn test_zoom_respects_step_and_range() {
        let control = zoom(0, 10, 5);
        assert_eq!(control.value_for(1.9, 4.0), 5);
        assert_eq!(control.value_for(10.0, 4.0), 10);
        assert_eq!(control.value_for(0.5, 4.0), 0);
    }

    #[test]
    fn test_probe_missing_device() {
        assert!(ZoomControl::probe("/nonexistent/video0").is_none());
    }
}
