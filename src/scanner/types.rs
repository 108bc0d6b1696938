// SPDX-License-Identifier: GPL-3.0-only

//! Data model of a scan session
//!
//! These types flow between the metadata output, the controller and the UI.
//! Rectangles are normalized (0.0 to 1.0) relative to the delivered frame
//! so they stay valid regardless of frame size or display scaling.

use crate::errors::ScanError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Barcode/QR encoding standard of a decoded payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbology {
    Qr,
    Ean8,
    Ean13,
    Pdf417,
    UpcE,
    Code93,
    Code128,
    Code39,
    Aztec,
    Itf14,
    DataMatrix,
}

impl Symbology {
    /// Every recognized symbology, in the order the scanner requests them
    pub const ALL: [Symbology; 11] = [
        Symbology::Qr,
        Symbology::Ean8,
        Symbology::Ean13,
        Symbology::Pdf417,
        Symbology::UpcE,
        Symbology::Code93,
        Symbology::Code128,
        Symbology::Code39,
        Symbology::Aztec,
        Symbology::Itf14,
        Symbology::DataMatrix,
    ];

    /// Get display name for the symbology
    pub fn display_name(&self) -> &'static str {
        match self {
            Symbology::Qr => "QR",
            Symbology::Ean8 => "EAN-8",
            Symbology::Ean13 => "EAN-13",
            Symbology::Pdf417 => "PDF417",
            Symbology::UpcE => "UPC-E",
            Symbology::Code93 => "Code 93",
            Symbology::Code128 => "Code 128",
            Symbology::Code39 => "Code 39",
            Symbology::Aztec => "Aztec",
            Symbology::Itf14 => "ITF-14",
            Symbology::DataMatrix => "Data Matrix",
        }
    }
}

impl std::fmt::Display for Symbology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// A normalized rectangle restricting where the decoder searches
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionOfInterest {
    /// Left edge (0.0 = left of frame, 1.0 = right of frame)
    pub x: f32,
    /// Top edge (0.0 = top of frame, 1.0 = bottom of frame)
    pub y: f32,
    /// Width as fraction of frame width
    pub width: f32,
    /// Height as fraction of frame height
    pub height: f32,
}

impl Default for RegionOfInterest {
    fn default() -> Self {
        Self::FULL
    }
}

impl RegionOfInterest {
    /// The whole frame
    pub const FULL: RegionOfInterest = RegionOfInterest {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a region from pixel coordinates
    pub fn from_pixels(
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        if frame_width == 0 || frame_height == 0 {
            return Self::FULL;
        }
        Self {
            x: x as f32 / frame_width as f32,
            y: y as f32 / frame_height as f32,
            width: width as f32 / frame_width as f32,
            height: height as f32 / frame_height as f32,
        }
    }

    /// Clamp the region into the unit square
    ///
    /// NaN coordinates, negative sizes and regions thinner than the decoder can
    /// use collapse to the full frame, so a bogus layout never reaches the
    /// decoder.
    pub fn clamped(&self) -> Self {
        let values = [self.x, self.y, self.width, self.height];
        if values.iter().any(|v| !v.is_finite()) {
            return Self::FULL;
        }

        let x0 = self.x.clamp(0.0, 1.0);
        let y0 = self.y.clamp(0.0, 1.0);
        let x1 = (self.x + self.width).clamp(0.0, 1.0);
        let y1 = (self.y + self.height).clamp(0.0, 1.0);

        let min_side = crate::constants::decoder::MIN_ROI_SIDE;
        if x1 - x0 < min_side || y1 - y0 < min_side {
            return Self::FULL;
        }

        Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        }
    }

    /// Whether the region covers the whole frame
    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }

    /// Pixel rectangle `(x, y, width, height)` covered in a frame
    pub fn to_pixels(&self, frame_width: u32, frame_height: u32) -> (u32, u32, u32, u32) {
        let roi = self.clamped();
        let x0 = (roi.x * frame_width as f32).floor() as u32;
        let y0 = (roi.y * frame_height as f32).floor() as u32;
        let x1 = ((roi.x + roi.width) * frame_width as f32).ceil() as u32;
        let y1 = ((roi.y + roi.height) * frame_height as f32).ceil() as u32;
        let x1 = x1.min(frame_width);
        let y1 = y1.min(frame_height);
        (x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }
}

/// A symbol located by the decoder in one frame
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataObject {
    /// Decoded string, `None` when the symbol was found but not readable
    pub payload: Option<String>,
    pub symbology: Symbology,
    /// Bounding box in normalized frame coordinates
    pub bounds: RegionOfInterest,
}

impl MetadataObject {
    /// A readable object
    pub fn readable(payload: impl Into<String>, symbology: Symbology) -> Self {
        Self {
            payload: Some(payload.into()),
            symbology,
            bounds: RegionOfInterest::FULL,
        }
    }

    /// A symbol that was located but could not be decoded
    pub fn unreadable(symbology: Symbology) -> Self {
        Self {
            payload: None,
            symbology,
            bounds: RegionOfInterest::FULL,
        }
    }
}

/// All objects reported for a single frame
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataBatch {
    /// Run the frame belongs to (see `ScanSessionController::start`)
    pub generation: u64,
    pub objects: Vec<MetadataObject>,
}

/// The latest successfully decoded payload
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedResult {
    pub payload: String,
    pub symbology: Symbology,
    pub bounds: RegionOfInterest,
    pub scanned_at: DateTime<Local>,
}

impl DecodedResult {
    pub fn new(payload: String, symbology: Symbology, bounds: RegionOfInterest) -> Self {
        Self {
            payload,
            symbology,
            bounds,
            scanned_at: Local::now(),
        }
    }
}

/// Camera permission as seen by the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionState {
    #[default]
    Unknown,
    Granted,
    Denied,
}

/// Status reported by a permission authority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    NotDetermined,
    Authorized,
    Denied,
    Restricted,
}

impl From<AuthorizationStatus> for PermissionState {
    fn from(status: AuthorizationStatus) -> Self {
        match status {
            AuthorizationStatus::NotDetermined => PermissionState::Unknown,
            AuthorizationStatus::Authorized => PermissionState::Granted,
            AuthorizationStatus::Denied | AuthorizationStatus::Restricted => {
                PermissionState::Denied
            }
        }
    }
}

/// Lifecycle state of the scan session controller
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScanState {
    #[default]
    Uninitialized,
    PermissionDenied,
    Configuring,
    Failed(ScanError),
    /// Configured and stopped
    Idle,
    Running,
    /// A code was just published; the session is being stopped
    Detected,
}

impl ScanState {
    /// Short label for status bars and logs
    pub fn label(&self) -> &'static str {
        match self {
            ScanState::Uninitialized => "Starting",
            ScanState::PermissionDenied => "Camera disabled",
            ScanState::Configuring => "Configuring",
            ScanState::Failed(_) => "Failed",
            ScanState::Idle => "Stopped",
            ScanState::Running => "Scanning",
            ScanState::Detected => "Detected",
        }
    }
}

/// A user-visible prompt raised by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    /// Camera access refused; the user has to enable it in system settings
    CameraDisabled,
    /// Device or attach failure
    SetupFailed(ScanError),
}

impl Alert {
    pub fn title(&self) -> &'static str {
        match self {
            Alert::CameraDisabled => "Camera Disabled",
            Alert::SetupFailed(_) => "Camera Unavailable",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Alert::CameraDisabled => ScanError::PermissionDenied.user_message(),
            Alert::SetupFailed(err) => err.user_message(),
        }
    }

    /// What the user can do about it
    pub fn hint(&self) -> &'static str {
        match self {
            Alert::CameraDisabled => {
                "Allow camera access in Settings > Privacy > Camera, then restart the scanner"
            }
            Alert::SetupFailed(_) => "Check that a camera is connected and press 'c' to retry",
        }
    }
}

/// Results produced off the UI thread, applied with `handle_event`
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// The permission prompt was answered
    PermissionResolved(bool),
    /// The metadata output found objects in a frame
    Metadata(MetadataBatch),
    /// The session reached the running state
    SessionStarted { generation: u64 },
    /// The session stopped running
    SessionStopped { generation: u64 },
    /// The session could not be started
    SessionFailed { generation: u64, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_size_region_falls_back_to_full_frame() {
        let roi = RegionOfInterest::new(0.5, 0.5, 0.0, 0.0);
        assert_eq!(roi.clamped(), RegionOfInterest::FULL);
    }

    #[test]
    fn test_region_clamped_into_unit_square() {
        let roi = RegionOfInterest::new(-0.25, 0.5, 0.75, 1.0).clamped();
        assert_eq!(roi.x, 0.0);
        assert_eq!(roi.y, 0.5);
        assert!((roi.width - 0.5).abs() < 1e-6);
        assert!((roi.height - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_nan_region_falls_back_to_full_frame() {
        let roi = RegionOfInterest::new(f32::NAN, 0.0, 1.0, 1.0);
        assert!(roi.clamped().is_full());
    }

    #[test]
    fn test_region_from_pixels() {
        let region = RegionOfInterest::from_pixels(100, 50, 200, 100, 1000, 500);
        assert!((region.x - 0.1).abs() < 0.001);
        assert!((region.y - 0.1).abs() < 0.001);
        assert!((region.width - 0.2).abs() < 0.001);
        assert!((region.height - 0.2).abs() < 0.001);
    }

    #[test]
    fn test_region_to_pixels() {
        let roi = RegionOfInterest::new(0.25, 0.25, 0.5, 0.5);
        assert_eq!(roi.to_pixels(640, 480), (160, 120, 320, 240));
    }

    #[test]
    fn test_authorization_maps_to_permission() {
        assert_eq!(
            PermissionState::from(AuthorizationStatus::Restricted),
            PermissionState::Denied
        );
        assert_eq!(
            PermissionState::from(AuthorizationStatus::NotDetermined),
            PermissionState::Unknown
        );
        assert_eq!(
            PermissionState::from(AuthorizationStatus::Authorized),
            PermissionState::Granted
        );
    }
}
