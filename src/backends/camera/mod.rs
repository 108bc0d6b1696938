// SPDX-License-Identifier: GPL-3.0-only

//! Camera capture abstraction
//!
//! ```text
//! ┌──────────────────────────┐
//! │  ScanSessionController   │  ← owns exactly one session
//! └────────────┬─────────────┘
//!              │
//!              ▼
//! ┌──────────────────────────┐
//! │  CaptureService trait    │  ← device lookup, inputs, sessions
//! └────────────┬─────────────┘
//!              │
//!      ┌───────┴────────┐
//!      ▼                ▼
//! ┌──────────┐   ┌──────────────┐
//! │GStreamer │   │Virtual (file)│
//! └──────────┘   └──────────────┘
//! ```
//!
//! A session is configured by attaching one input and its outputs, then
//! started and stopped any number of times. Outputs receive frames through
//! bounded channels; frames are dropped when a consumer falls behind.

pub mod enumeration;
pub mod pipeline;
pub mod types;
pub mod v4l2_controls;

pub use pipeline::{GstCaptureService, GstCaptureSession};
pub use types::*;

/// Handle for an opened camera device
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureInput {
    pub device: CameraDevice,
    /// Largest zoom factor the input supports
    pub max_zoom_factor: f32,
}

/// What an output does with the frames it receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    /// Frames shown to the user
    Preview,
    /// Frames analysed for barcodes
    Metadata,
}

/// A frame sink attached to a session
#[derive(Debug)]
pub struct SessionOutput {
    pub kind: OutputKind,
    pub sender: FrameSender,
}

impl SessionOutput {
    /// Create an output and the receiver its frames arrive on
    pub fn channel(kind: OutputKind) -> (Self, FrameReceiver) {
        let (sender, receiver) =
            futures::channel::mpsc::channel(crate::constants::pipeline::FRAME_CHANNEL_CAPACITY);
        (Self { kind, sender }, receiver)
    }
}

/// Platform camera service
pub trait CaptureService: Send + Sync + 'static {
    type Session: CaptureSession;

    /// Enumerate available cameras
    fn enumerate_cameras(&self) -> Vec<CameraDevice>;

    /// Pick the camera for `position`
    ///
    /// Cameras reporting no placement (typical desktop webcams) are accepted
    /// when no camera matches exactly.
    fn default_device(&self, position: CameraPosition) -> Option<CameraDevice> {
        select_device(&self.enumerate_cameras(), position)
    }

    /// Open an input for a device
    fn open_input(&self, device: &CameraDevice) -> BackendResult<CaptureInput>;

    /// Create an empty, unconfigured session
    fn new_session(&self) -> Self::Session;
}

/// One camera pipeline
///
/// Configuration (`add_*`) happens through `&mut self` before the session is
/// shared; running control is `&self` and internally synchronized.
pub trait CaptureSession: Send + Sync + 'static {
    /// Whether `input` can be attached
    fn can_add_input(&self, input: &CaptureInput) -> bool;

    /// Attach the camera input
    fn add_input(&mut self, input: CaptureInput);

    /// Whether an output of `kind` can be attached
    fn can_add_output(&self, kind: OutputKind) -> bool;

    /// Attach a frame output
    fn add_output(&mut self, output: SessionOutput);

    /// Start delivering frames; blocks until the pipeline runs. No-op when running.
    fn start_running(&self) -> BackendResult<()>;

    /// Stop delivering frames. No-op when stopped.
    fn stop_running(&self);

    /// Check if the session delivers frames
    fn is_running(&self) -> bool;

    /// Apply a zoom factor in `1.0..=max_zoom_factor()`
    fn set_zoom_factor(&self, factor: f32) -> BackendResult<()>;

    /// Largest zoom factor the attached input supports
    fn max_zoom_factor(&self) -> f32;
}

/// Choose a camera for `position` from an enumeration
pub fn select_device(cameras: &[CameraDevice], position: CameraPosition) -> Option<CameraDevice> {
    cameras
        .iter()
        .find(|c| c.position == Some(position))
        .or_else(|| {
            cameras
                .iter()
                .find(|c| matches!(c.position, None | Some(CameraPosition::External)))
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(name: &str, position: Option<CameraPosition>) -> CameraDevice {
        CameraDevice {
            name: name.to_string(),
            path: name.to_string(),
            position,
            v4l2_path: None,
        }
    }

    #[test]
    fn test_select_device_prefers_exact_position() {
        let cameras = vec![
            camera("front", Some(CameraPosition::Front)),
            camera("back", Some(CameraPosition::Back)),
        ];
        let selected = select_device(&cameras, CameraPosition::Back).unwrap();
        assert_eq!(selected.name, "back");
    }

    #[test]
    fn test_select_device_accepts_unplaced_webcam() {
        let cameras = vec![camera("webcam", None)];
        let selected = select_device(&cameras, CameraPosition::Back).unwrap();
        assert_eq!(selected.name, "webcam");
    }

    #[test]
    fn test_select_device_rejects_other_placement() {
        let cameras = vec![camera("front", Some(CameraPosition::Front))];
        assert!(select_device(&cameras, CameraPosition::Back).is_none());
        assert!(select_device(&[], CameraPosition::Back).is_none());
    }
}
