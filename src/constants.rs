// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

/// Application identifier used for D-Bus and config paths
pub const APP_ID: &str = "io.github.qr_scanner";

/// Directory name under the XDG config/cache directories
pub const APP_DIR_NAME: &str = "qr-scanner";

/// Timing constants
pub mod timing {
    use std::time::Duration;

    /// Timeout for pipeline start (seconds)
    pub const START_TIMEOUT_SECS: u64 = 5;

    /// Timeout for pipeline stop (seconds)
    pub const STOP_TIMEOUT_SECS: u64 = 2;

    /// Frame log interval (log every N frames)
    pub const FRAME_LOG_INTERVAL: u64 = 60;

    /// Terminal input poll interval (~60 redraws per second)
    pub const UI_POLL_INTERVAL: Duration = Duration::from_millis(16);

    /// Interval between frames emitted by the virtual camera
    pub const VIRTUAL_FRAME_INTERVAL: Duration = Duration::from_millis(100);

    /// How long the portal prompt may take before we give up waiting
    pub const PORTAL_RESPONSE_TIMEOUT: Duration = Duration::from_secs(120);
}

/// GStreamer pipeline constants
pub mod pipeline {
    /// Maximum buffers held by the appsink
    pub const MAX_BUFFERS: u32 = 2;

    /// Capacity of the per-output frame channel
    pub const FRAME_CHANNEL_CAPACITY: usize = 2;
}

/// Zoom constants
pub mod zoom {
    /// Divisor applied to gesture velocity before `atan2`
    pub const VELOCITY_DIVIDER: f32 = 10.0;

    /// Minimum zoom factor
    pub const MIN_FACTOR: f32 = 1.0;

    /// Default maximum zoom factor when the device doesn't report one
    pub const DEFAULT_MAX_FACTOR: f32 = 4.0;

    /// Velocity emitted by a single zoom key press or scroll step
    pub const KEY_VELOCITY: f32 = 0.05;
}

/// Decoder constants
pub mod decoder {
    /// Frames are downscaled so that their longest side fits this value
    pub const DEFAULT_MAX_DIMENSION: u32 = 640;

    /// Smallest region of interest side (normalized) that is still decoded
    pub const MIN_ROI_SIDE: f32 = 0.01;
}

/// Scan frame overlay constants
pub mod scan_frame {
    /// Default scan frame side as a fraction of the shorter preview side
    pub const DEFAULT_FRACTION: f32 = 0.7;

    /// Length of the corner brackets as a fraction of the frame side
    pub const CORNER_FRACTION: f32 = 0.15;
}

/// D-Bus names for desktop integration
pub mod dbus {
    /// xdg-desktop-portal bus name
    pub const PORTAL_BUS_NAME: &str = "org.freedesktop.portal.Desktop";
    /// xdg-desktop-portal object path
    pub const PORTAL_OBJECT_PATH: &str = "/org/freedesktop/portal/desktop";
    /// Camera portal interface
    pub const CAMERA_INTERFACE: &str = "org.freedesktop.portal.Camera";
    /// Portal request interface
    pub const REQUEST_INTERFACE: &str = "org.freedesktop.portal.Request";
    /// Portal permission store bus name
    pub const PERMISSION_STORE_BUS_NAME: &str = "org.freedesktop.impl.portal.PermissionStore";
    /// Portal permission store object path
    pub const PERMISSION_STORE_PATH: &str = "/org/freedesktop/impl/portal/PermissionStore";
    /// Permission store table holding device permissions
    pub const PERMISSION_STORE_TABLE: &str = "devices";
    /// Permission store entry for the camera
    pub const PERMISSION_STORE_CAMERA_ID: &str = "camera";

    /// feedbackd bus name
    pub const FEEDBACKD_BUS_NAME: &str = "org.sigxcpu.Feedback";
    /// feedbackd object path
    pub const FEEDBACKD_OBJECT_PATH: &str = "/org/sigxcpu/Feedback";
    /// feedbackd interface
    pub const FEEDBACKD_INTERFACE: &str = "org.sigxcpu.Feedback";
    /// Event triggered after a successful scan
    pub const FEEDBACKD_SCAN_EVENT: &str = "button-pressed";
}

/// Supported input file formats for the virtual camera
pub mod file_formats {
    /// Supported image file extensions
    pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "gif"];

    /// Check if a file extension is a supported image format
    pub fn is_image_extension(ext: &str) -> bool {
        IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
    }
}
