// SPDX-License-Identifier: GPL-3.0-only

//! Virtual camera streaming image files
//!
//! Each configured path (an image or a directory of images) shows up as a
//! camera. While running, the session repeats its images at a fixed rate,
//! which is enough for the decoder and makes the scanner usable without
//! camera hardware.

pub mod file_source;

use crate::backends::camera::types::*;
use crate::backends::camera::{
    CaptureInput, CaptureService, CaptureSession, OutputKind, SessionOutput,
};
use crate::constants::{timing, zoom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, info};

/// Camera service over image files
#[derive(Debug, Clone, Default)]
pub struct VirtualCaptureService {
    sources: Vec<PathBuf>,
}

impl VirtualCaptureService {
    pub fn new(sources: Vec<PathBuf>) -> Self {
        Self { sources }
    }
}

impl CaptureService for VirtualCaptureService {
    type Session = VirtualCaptureSession;

    fn enumerate_cameras(&self) -> Vec<CameraDevice> {
        self.sources
            .iter()
            .filter(|p| p.exists())
            .map(|p| CameraDevice {
                name: p
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| p.display().to_string()),
                path: p.display().to_string(),
                position: Some(CameraPosition::Back),
                v4l2_path: None,
            })
            .collect()
    }

    fn open_input(&self, device: &CameraDevice) -> BackendResult<CaptureInput> {
        let images = file_source::collect_images(&PathBuf::from(&device.path));
        if images.is_empty() {
            return Err(BackendError::DeviceNotFound(format!(
                "no images in {}",
                device.path
            )));
        }
        Ok(CaptureInput {
            device: device.clone(),
            max_zoom_factor: zoom::DEFAULT_MAX_FACTOR,
        })
    }

    fn new_session(&self) -> VirtualCaptureSession {
        VirtualCaptureSession::default()
    }
}

struct Streamer {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Session repeating image frames on a thread
pub struct VirtualCaptureSession {
    input: Option<CaptureInput>,
    outputs: Vec<SessionOutput>,
    digital_zoom: Arc<AtomicU32>,
    streamer: Mutex<Option<Streamer>>,
}

impl Default for VirtualCaptureSession {
    fn default() -> Self {
        Self {
            input: None,
            outputs: Vec::new(),
            digital_zoom: Arc::new(AtomicU32::new(zoom::MIN_FACTOR.to_bits())),
            streamer: Mutex::new(None),
        }
    }
}

impl CaptureSession for VirtualCaptureSession {
    fn can_add_input(&self, _input: &CaptureInput) -> bool {
        self.input.is_none()
    }

    fn add_input(&mut self, input: CaptureInput) {
        self.input = Some(input);
    }

    fn can_add_output(&self, kind: OutputKind) -> bool {
        !self.outputs.iter().any(|o| o.kind == kind)
    }

    fn add_output(&mut self, output: SessionOutput) {
        self.outputs.push(output);
    }

    fn start_running(&self) -> BackendResult<()> {
        let mut streamer = self.streamer.lock().unwrap();
        if streamer.is_some() {
            return Ok(());
        }
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| BackendError::InitializationFailed("No input attached".to_string()))?;

        let frames = file_source::collect_images(&PathBuf::from(&input.device.path))
            .iter()
            .map(|p| file_source::load_image_as_frame(p))
            .collect::<BackendResult<Vec<_>>>()?;
        if frames.is_empty() {
            return Err(BackendError::DeviceNotFound(input.device.path.clone()));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let mut senders: Vec<FrameSender> =
            self.outputs.iter().map(|o| o.sender.clone()).collect();
        let digital_zoom = Arc::clone(&self.digital_zoom);

        let thread = std::thread::spawn(move || {
            let mut index = 0usize;
            while !thread_stop.load(Ordering::SeqCst) {
                let zoom = f32::from_bits(digital_zoom.load(Ordering::Relaxed));
                let mut frame = frames[index % frames.len()].crop_center(zoom);
                frame.captured_at = std::time::Instant::now();
                for sender in senders.iter_mut() {
                    let _ = sender.try_send(frame.clone());
                }
                index += 1;
                std::thread::sleep(timing::VIRTUAL_FRAME_INTERVAL);
            }
            debug!("Virtual camera thread finished");
        });

        info!(device = %input.device.name, "Virtual camera streaming");
        *streamer = Some(Streamer { stop, thread });
        Ok(())
    }

    fn stop_running(&self) {
        let streamer = self.streamer.lock().unwrap().take();
        if let Some(streamer) = streamer {
            streamer.stop.store(true, Ordering::SeqCst);
            let _ = streamer.thread.join();
            info!("Virtual camera stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.streamer.lock().unwrap().is_some()
    }

    fn set_zoom_factor(&self, factor: f32) -> BackendResult<()> {
        let factor = factor.clamp(zoom::MIN_FACTOR, self.max_zoom_factor());
        self.digital_zoom.store(factor.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn max_zoom_factor(&self) -> f32 {
        self.input
            .as_ref()
            .map(|i| i.max_zoom_factor)
            .unwrap_or(zoom::MIN_FACTOR)
    }
}

impl Drop for VirtualCaptureSession {
    fn drop(&mut self) {
        self.stop_running();
    }
}
