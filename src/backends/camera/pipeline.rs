// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer capture session
//!
//! One pipeline per running session:
//!
//! ```text
//! pipewiresrc | v4l2src ! decodebin ! videoconvert ! video/x-raw,format=RGBA ! appsink
//! ```
//!
//! The appsink callback maps each buffer once and fans the frame out to every
//! attached output with `try_send`, so a slow consumer only loses frames.

use super::enumeration::{self, PIPEWIRE_SERIAL_PREFIX};
use super::types::*;
use super::v4l2_controls::{self, ZoomControl};
use super::{CaptureInput, CaptureService, CaptureSession, OutputKind, SessionOutput};
use crate::constants::{pipeline, timing, zoom};
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Camera service backed by GStreamer sources
#[derive(Debug, Clone)]
pub struct GstCaptureService {
    backend: CameraBackendType,
}

impl GstCaptureService {
    pub fn new(backend: CameraBackendType) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> CameraBackendType {
        self.backend
    }

    fn source_element(&self) -> &'static str {
        match self.backend {
            CameraBackendType::V4l2 => "v4l2src",
            _ => "pipewiresrc",
        }
    }
}

impl CaptureService for GstCaptureService {
    type Session = GstCaptureSession;

    fn enumerate_cameras(&self) -> Vec<CameraDevice> {
        if let Err(e) = gstreamer::init() {
            warn!(error = %e, "GStreamer init failed");
            return Vec::new();
        }
        enumeration::enumerate(self.backend)
    }

    fn open_input(&self, device: &CameraDevice) -> BackendResult<CaptureInput> {
        gstreamer::init().map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let element = self.source_element();
        if gstreamer::ElementFactory::find(element).is_none() {
            return Err(BackendError::NotAvailable(format!(
                "GStreamer element {} is not installed",
                element
            )));
        }

        if let Some(path) = &device.v4l2_path
            && !std::path::Path::new(path).exists()
        {
            return Err(BackendError::DeviceNotFound(path.clone()));
        }

        info!(device = %device.name, backend = %self.backend, "Opened camera input");
        Ok(CaptureInput {
            device: device.clone(),
            max_zoom_factor: zoom::DEFAULT_MAX_FACTOR,
        })
    }

    fn new_session(&self) -> GstCaptureSession {
        GstCaptureSession::new(self.backend)
    }
}

/// A built, playing pipeline
struct RunningPipeline {
    pipeline: gstreamer::Pipeline,
    appsink: AppSink,
}

impl RunningPipeline {
    fn shutdown(self) {
        // Release the references held by the callback
        self.appsink
            .set_callbacks(gstreamer_app::AppSinkCallbacks::builder().build());

        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!(error = %e, "Failed to stop pipeline");
            return;
        }
        let (result, state, _) = self.pipeline.state(gstreamer::ClockTime::from_seconds(
            timing::STOP_TIMEOUT_SECS,
        ));
        match result {
            Ok(_) => debug!(state = ?state, "Pipeline stopped"),
            Err(e) => debug!(error = ?e, state = ?state, "Pipeline state change had issues"),
        }
    }
}

/// Capture session running a GStreamer pipeline
pub struct GstCaptureSession {
    backend: CameraBackendType,
    input: Option<CaptureInput>,
    outputs: Vec<SessionOutput>,
    hardware_zoom: Option<ZoomControl>,
    /// Digital zoom factor as f32 bits, read by the appsink callback
    digital_zoom: Arc<AtomicU32>,
    running: Mutex<Option<RunningPipeline>>,
}

impl GstCaptureSession {
    fn new(backend: CameraBackendType) -> Self {
        Self {
            backend,
            input: None,
            outputs: Vec::new(),
            hardware_zoom: None,
            digital_zoom: Arc::new(AtomicU32::new(zoom::MIN_FACTOR.to_bits())),
            running: Mutex::new(None),
        }
    }

    fn build_pipeline(&self, input: &CaptureInput) -> BackendResult<RunningPipeline> {
        let description = pipeline_description(self.backend, &input.device);
        info!(device = %input.device.name, pipeline = %description, "Creating capture pipeline");

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?
            .dynamic_cast::<gstreamer::Pipeline>()
            .map_err(|_| {
                BackendError::InitializationFailed("Failed to cast pipeline".to_string())
            })?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| BackendError::InitializationFailed("Failed to get appsink".to_string()))?
            .dynamic_cast::<AppSink>()
            .map_err(|_| {
                BackendError::InitializationFailed("Failed to cast appsink".to_string())
            })?;

        appsink.set_property("sync", false);
        appsink.set_property("max-buffers", pipeline::MAX_BUFFERS);
        appsink.set_property("drop", true);
        appsink.set_property("enable-last-sample", false);

        let mut senders: Vec<FrameSender> =
            self.outputs.iter().map(|o| o.sender.clone()).collect();
        let digital_zoom = Arc::clone(&self.digital_zoom);
        let frame_counter = AtomicU64::new(0);

        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let frame_start = Instant::now();
                    let frame_num = frame_counter.fetch_add(1, Ordering::Relaxed);

                    let sample = appsink.pull_sample().map_err(|_| gstreamer::FlowError::Eos)?;
                    let caps = sample.caps().ok_or(gstreamer::FlowError::Error)?;
                    let video_info = VideoInfo::from_caps(caps).map_err(|e| {
                        error!(frame = frame_num, error = ?e, "Failed to get video info");
                        gstreamer::FlowError::Error
                    })?;
                    let buffer = sample.buffer_owned().ok_or(gstreamer::FlowError::Error)?;
                    if buffer.flags().contains(gstreamer::BufferFlags::CORRUPTED) {
                        return Ok(gstreamer::FlowSuccess::Ok);
                    }
                    let mapped = buffer.into_mapped_buffer_readable().map_err(|_| {
                        error!(frame = frame_num, "Failed to map buffer");
                        gstreamer::FlowError::Error
                    })?;

                    let frame = CameraFrame {
                        width: video_info.width(),
                        height: video_info.height(),
                        data: FrameData::from_mapped_buffer(mapped),
                        format: PixelFormat::RGBA,
                        stride: video_info.stride()[0] as u32,
                        captured_at: frame_start,
                    };
                    let zoom = f32::from_bits(digital_zoom.load(Ordering::Relaxed));
                    let frame = frame.crop_center(zoom);

                    for sender in senders.iter_mut() {
                        if let Err(e) = sender.try_send(frame.clone())
                            && frame_num % timing::FRAME_LOG_INTERVAL == 0
                        {
                            debug!(frame = frame_num, error = ?e, "Frame dropped (channel full)");
                        }
                    }

                    if frame_num % timing::FRAME_LOG_INTERVAL == 0 {
                        debug!(
                            frame = frame_num,
                            width = frame.width,
                            height = frame.height,
                            zoom,
                            total_us = frame_start.elapsed().as_micros(),
                            "Frame delivered"
                        );
                    }

                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        Ok(RunningPipeline { pipeline, appsink })
    }
}

/// gst-launch description for a device
fn pipeline_description(backend: CameraBackendType, device: &CameraDevice) -> String {
    let source = match backend {
        CameraBackendType::V4l2 => {
            let path = device.v4l2_path.as_deref().unwrap_or(&device.path);
            format!("v4l2src device={}", path)
        }
        _ => {
            if let Some(serial) = device.path.strip_prefix(PIPEWIRE_SERIAL_PREFIX) {
                format!("pipewiresrc target-object={}", serial)
            } else if let Some(id) = device.path.strip_prefix("pipewire-") {
                format!("pipewiresrc path={}", id)
            } else {
                "pipewiresrc".to_string()
            }
        }
    };

    format!(
        "{} ! decodebin ! videoconvert ! video/x-raw,format=RGBA ! appsink name=sink",
        source
    )
}

impl CaptureSession for GstCaptureSession {
    fn can_add_input(&self, _input: &CaptureInput) -> bool {
        self.input.is_none()
    }

    fn add_input(&mut self, input: CaptureInput) {
        if let Some(path) = input.device.v4l2_path.as_deref() {
            self.hardware_zoom = ZoomControl::probe(path);
            v4l2_controls::enable_autofocus(path);
        }
        self.input = Some(input);
    }

    fn can_add_output(&self, kind: OutputKind) -> bool {
        !self.outputs.iter().any(|o| o.kind == kind)
    }

    fn add_output(&mut self, output: SessionOutput) {
        debug!(kind = ?output.kind, "Output attached");
        self.outputs.push(output);
    }

    fn start_running(&self) -> BackendResult<()> {
        let mut running = self.running.lock().unwrap();
        if running.is_some() {
            return Ok(());
        }
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| BackendError::InitializationFailed("No input attached".to_string()))?;

        let built = self.build_pipeline(input)?;
        if let Err(e) = built.pipeline.set_state(gstreamer::State::Playing) {
            built.shutdown();
            return Err(BackendError::InitializationFailed(format!(
                "Failed to start pipeline: {}",
                e
            )));
        }

        let (result, state, pending) = built.pipeline.state(gstreamer::ClockTime::from_seconds(
            timing::START_TIMEOUT_SECS,
        ));
        debug!(result = ?result, state = ?state, pending = ?pending, "Pipeline state");
        if let Err(e) = result {
            built.shutdown();
            return Err(BackendError::InitializationFailed(format!(
                "Camera did not start: {:?}",
                e
            )));
        }

        info!(device = %input.device.name, "Capture session running");
        *running = Some(built);
        Ok(())
    }

    fn stop_running(&self) {
        let pipeline = self.running.lock().unwrap().take();
        if let Some(pipeline) = pipeline {
            info!("Stopping capture session");
            pipeline.shutdown();
        }
    }

    fn is_running(&self) -> bool {
        self.running.lock().unwrap().is_some()
    }

    fn set_zoom_factor(&self, factor: f32) -> BackendResult<()> {
        let max = self.max_zoom_factor();
        let factor = factor.clamp(zoom::MIN_FACTOR, max);

        if let Some(control) = &self.hardware_zoom {
            return control
                .apply(factor, max)
                .map_err(BackendError::ControlNotSupported);
        }
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

impl Drop for GstCaptureSession {
    fn drop(&mut self) {
        self.stop_running();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(path: &str, v4l2_path: Option<&str>) -> CameraDevice {
        CameraDevice {
            name: "cam".to_string(),
            path: path.to_string(),
            position: None,
            v4l2_path: v4l2_path.map(str::to_string),
        }
    }

    #[test]
    fn test_pipewire_description_targets_serial() {
        let desc = pipeline_description(
            CameraBackendType::PipeWire,
            &device("pipewire-serial-2146", None),
        );
        assert!(desc.starts_with("pipewiresrc target-object=2146 !"));
        assert!(desc.ends_with("appsink name=sink"));
    }

    #[test]
    fn test_pipewire_default_camera() {
        let desc = pipeline_description(CameraBackendType::PipeWire, &device("", None));
        assert!(desc.starts_with("pipewiresrc !"));
    }

    #[test]
    fn test_v4l2_description_uses_node() {
        let desc = pipeline_description(
            CameraBackendType::V4l2,
            &device("/dev/video2", Some("/dev/video2")),
        );
        assert!(desc.starts_with("v4l2src device=/dev/video2 !"));
        assert!(desc.contains("format=RGBA"));
    }

    #[test]
    fn test_session_accepts_one_output_per_kind() {
        let mut session = GstCaptureSession::new(CameraBackendType::PipeWire);
        let (preview, _rx) = SessionOutput::channel(OutputKind::Preview);
        assert!(session.can_add_output(OutputKind::Preview));
        session.add_output(preview);
        assert!(!session.can_add_output(OutputKind::Preview));
        assert!(session.can_add_output(OutputKind::Metadata));
        assert!(!session.is_running());
    }

    #[test]
    fn test_digital_zoom_is_clamped() {
        let mut session = GstCaptureSession::new(CameraBackendType::PipeWire);
        session.add_input(CaptureInput {
            device: device("", None),
            max_zoom_factor: 4.0,
        });
        session.set_zoom_factor(10.0).unwrap();
        assert_eq!(f32::from_bits(session.digital_zoom.load(Ordering::Relaxed)), 4.0);
    }
}
