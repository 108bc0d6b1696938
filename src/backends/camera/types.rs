// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for camera backends

use gstreamer::buffer::{MappedBuffer, Readable};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Frame data storage - either pre-copied bytes or zero-copy GStreamer buffer
///
/// The `Mapped` variant keeps the GStreamer buffer mapped and alive until all
/// references are dropped, so frames can be fanned out to the preview and the
/// decoder without copying pixels.
#[derive(Clone)]
pub enum FrameData {
    /// Pre-copied bytes (file sources, digital zoom crops, tests)
    Copied(Arc<[u8]>),
    /// Zero-copy mapped GStreamer buffer
    Mapped(Arc<MappedBuffer<Readable>>),
}

impl FrameData {
    /// Create FrameData from a mapped GStreamer buffer (zero-copy)
    pub fn from_mapped_buffer(buffer: MappedBuffer<Readable>) -> Self {
        FrameData::Mapped(Arc::new(buffer))
    }

    /// Get the length of the frame data in bytes
    pub fn len(&self) -> usize {
        match self {
            FrameData::Copied(data) => data.len(),
            FrameData::Mapped(buf) => buf.len(),
        }
    }

    /// Check if the frame data is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<u8>> for FrameData {
    fn from(data: Vec<u8>) -> Self {
        FrameData::Copied(Arc::from(data.into_boxed_slice()))
    }
}

impl std::fmt::Debug for FrameData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameData::Copied(data) => write!(f, "FrameData::Copied({} bytes)", data.len()),
            FrameData::Mapped(buf) => write!(f, "FrameData::Mapped({} bytes)", buf.len()),
        }
    }
}

impl AsRef<[u8]> for FrameData {
    fn as_ref(&self) -> &[u8] {
        match self {
            FrameData::Copied(data) => data.as_ref(),
            FrameData::Mapped(buf) => buf.as_slice(),
        }
    }
}

impl std::ops::Deref for FrameData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_ref()
    }
}

/// Camera backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CameraBackendType {
    /// PipeWire through `pipewiresrc` (modern Linux standard)
    #[default]
    PipeWire,
    /// Direct V4L2 device access through `v4l2src`
    V4l2,
    /// Still images streamed from files
    Virtual,
}

impl std::fmt::Display for CameraBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraBackendType::PipeWire => write!(f, "PipeWire"),
            CameraBackendType::V4l2 => write!(f, "V4L2"),
            CameraBackendType::Virtual => write!(f, "Virtual"),
        }
    }
}

/// Physical placement of a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CameraPosition {
    /// Rear-facing (world) camera, preferred for scanning
    #[default]
    Back,
    /// Front-facing (user) camera
    Front,
    /// USB webcam or other external device
    External,
}

impl CameraPosition {
    /// Parse the libcamera `api.libcamera.location` property
    pub fn from_libcamera_location(location: &str) -> Option<Self> {
        match location.trim().trim_matches('"') {
            "back" => Some(CameraPosition::Back),
            "front" => Some(CameraPosition::Front),
            "external" => Some(CameraPosition::External),
            _ => None,
        }
    }
}

impl std::fmt::Display for CameraPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraPosition::Back => write!(f, "back"),
            CameraPosition::Front => write!(f, "front"),
            CameraPosition::External => write!(f, "external"),
        }
    }
}

/// Represents a camera device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDevice {
    pub name: String,
    /// Backend specific path (pipewire serial, /dev/videoN or an image file)
    pub path: String,
    /// Placement, when the backend reports one
    pub position: Option<CameraPosition>,
    /// V4L2 node backing this camera, used for zoom controls
    pub v4l2_path: Option<String>,
}

/// Pixel format for camera frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// RGBA - 32-bit with alpha (4 bytes per pixel)
    RGBA,
    /// Gray8 - 8-bit luminance (1 byte per pixel)
    Gray8,
}

impl PixelFormat {
    /// Bytes used by one pixel
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::RGBA => 4,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// A single frame from the camera
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    pub data: FrameData,
    pub format: PixelFormat,
    /// Row stride in bytes (may include padding)
    pub stride: u32,
    /// Timestamp when frame was captured (for latency diagnostics)
    pub captured_at: Instant,
}

impl CameraFrame {
    /// Build a tightly packed RGBA frame from owned pixels
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data: FrameData::from(data),
            format: PixelFormat::RGBA,
            stride: width * 4,
            captured_at: Instant::now(),
        }
    }

    /// Get the raw bytes of the frame
    pub fn data_slice(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// Sample the RGB value of a pixel, clamping coordinates to the frame
    pub fn rgb_at(&self, x: u32, y: u32) -> (u8, u8, u8) {
        if self.width == 0 || self.height == 0 {
            return (0, 0, 0);
        }
        let x = x.min(self.width - 1);
        let y = y.min(self.height - 1);
        let data = self.data_slice();

        match self.format {
            PixelFormat::RGBA => {
                let idx = (y * self.stride + x * 4) as usize;
                if idx + 2 < data.len() {
                    (data[idx], data[idx + 1], data[idx + 2])
                } else {
                    (0, 0, 0)
                }
            }
            PixelFormat::Gray8 => {
                let idx = (y * self.stride + x) as usize;
                let v = data.get(idx).copied().unwrap_or(0);
                (v, v, v)
            }
        }
    }

    /// Sample the BT.601 luminance of a pixel
    pub fn luma_at(&self, x: u32, y: u32) -> u8 {
        match self.format {
            PixelFormat::Gray8 => self.rgb_at(x, y).0,
            PixelFormat::RGBA => {
                let (r, g, b) = self.rgb_at(x, y);
                ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
            }
        }
    }

    /// Convert to a frame with copied data (safe for background processing)
    ///
    /// Mapped GStreamer buffers become invalid when the pipeline is destroyed.
    pub fn to_copied(&self) -> Self {
        let copied_data = match &self.data {
            FrameData::Copied(data) => FrameData::Copied(Arc::clone(data)),
            FrameData::Mapped(buffer) => {
                let slice: &[u8] = buffer.as_ref();
                FrameData::Copied(Arc::from(slice))
            }
        };

        Self {
            width: self.width,
            height: self.height,
            data: copied_data,
            format: self.format,
            stride: self.stride,
            captured_at: self.captured_at,
        }
    }

    /// Crop the centre of the frame by `zoom` (digital zoom)
    ///
    /// A factor of 1.0 (or less) returns the frame unchanged.
    pub fn crop_center(&self, zoom: f32) -> Self {
        if zoom <= 1.0 || self.width == 0 || self.height == 0 {
            return self.clone();
        }

        let crop_width = ((self.width as f32 / zoom) as u32).max(1);
        let crop_height = ((self.height as f32 / zoom) as u32).max(1);
        let x0 = (self.width - crop_width) / 2;
        let y0 = (self.height - crop_height) / 2;
        let bpp = self.format.bytes_per_pixel();
        let data = self.data_slice();

        let mut cropped = Vec::with_capacity((crop_width * crop_height * bpp) as usize);
        for y in y0..y0 + crop_height {
            let row_start = (y * self.stride + x0 * bpp) as usize;
            let row_end = row_start + (crop_width * bpp) as usize;
            if row_end <= data.len() {
                cropped.extend_from_slice(&data[row_start..row_end]);
            }
        }

        Self {
            width: crop_width,
            height: crop_height,
            data: FrameData::from(cropped),
            format: self.format,
            stride: crop_width * bpp,
            captured_at: self.captured_at,
        }
    }
}

/// Frame receiver type for session outputs
pub type FrameReceiver = futures::channel::mpsc::Receiver<CameraFrame>;

/// Frame sender type for session outputs
pub type FrameSender = futures::channel::mpsc::Sender<CameraFrame>;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for backend operations
#[derive(Debug, Clone)]
pub enum BackendError {
    /// Backend is not available on this system
    NotAvailable(String),
    /// Failed to initialize backend
    InitializationFailed(String),
    /// Camera device not found
    DeviceNotFound(String),
    /// Control not supported by the device
    ControlNotSupported(String),
    /// General I/O error
    IoError(String),
    /// Other errors
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotAvailable(msg) => write!(f, "Backend not available: {}", msg),
            BackendError::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::ControlNotSupported(msg) => write!(f, "Control not supported: {}", msg),
            BackendError::IoError(msg) => write!(f, "I/O error: {}", msg),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::IoError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_center_halves_dimensions() {
        // 4x4 gray frame, value = x + 4 * y
        let data: Vec<u8> = (0..16).collect();
        let frame = CameraFrame {
            width: 4,
            height: 4,
            data: FrameData::from(data),
            format: PixelFormat::Gray8,
            stride: 4,
            captured_at: Instant::now(),
        };

        let cropped = frame.crop_center(2.0);
        assert_eq!(cropped.width, 2);
        assert_eq!(cropped.height, 2);
        assert_eq!(cropped.data_slice(), &[5, 6, 9, 10]);
    }

    #[test]
    fn test_crop_center_noop_at_unit_zoom() {
        let frame = CameraFrame::from_rgba(2, 2, vec![255; 16]);
        let cropped = frame.crop_center(1.0);
        assert_eq!(cropped.width, 2);
        assert_eq!(cropped.data_slice().len(), 16);
    }

    #[test]
    fn test_luma_respects_stride() {
        // 1x2 RGBA frame with 4 bytes of row padding
        let data: Vec<u8> = vec![
            255, 255, 255, 255, 0, 0, 0, 0, // white + padding
            0, 0, 0, 255, 9, 9, 9, 9, // black + padding
        ];
        let frame = CameraFrame {
            width: 1,
            height: 2,
            data: FrameData::from(data),
            format: PixelFormat::RGBA,
            stride: 8,
            captured_at: Instant::now(),
        };

        assert_eq!(frame.luma_at(0, 0), 255);
        assert_eq!(frame.luma_at(0, 1), 0);
    }

    #[test]
    fn test_camera_position_from_libcamera() {
        assert_eq!(
            CameraPosition::from_libcamera_location("\"back\""),
            Some(CameraPosition::Back)
        );
        assert_eq!(
            CameraPosition::from_libcamera_location("front"),
            Some(CameraPosition::Front)
        );
        assert_eq!(CameraPosition::from_libcamera_location("side"), None);
    }
}
