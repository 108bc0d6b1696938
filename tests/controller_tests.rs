// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the scan session controller
//!
//! The capture service, decoder and permission authority are fakes that
//! record what the controller asked of them.

use qr_scanner::backends::camera::types::{BackendError, BackendResult, CameraFrame, FrameSender};
use qr_scanner::backends::camera::{
    CameraDevice, CameraPosition, CaptureInput, CaptureService, CaptureSession, OutputKind,
    SessionOutput,
};
use qr_scanner::backends::permission::PermissionAuthority;
use qr_scanner::errors::ScanError;
use qr_scanner::scanner::{
    Alert, AuthorizationStatus, ControllerOptions, DecodedResult, MetadataBatch, MetadataDecoder,
    MetadataObject, PermissionState, PreviewLayer, Rect, RegionOfInterest, ScanEvent,
    ScanSessionController, ScanState, Size, Symbology,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;

/// What the fake camera was asked to do
#[derive(Default)]
struct CameraLog {
    inputs_added: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
    zoom: Mutex<Option<f32>>,
    no_device: AtomicBool,
    reject_input: AtomicBool,
    fail_start: AtomicBool,
    metadata: Mutex<Option<FrameSender>>,
}

impl CameraLog {
    /// Feed frames to the controller's metadata output as the camera would
    fn metadata_frames(&self) -> FrameSender {
        self.metadata
            .lock()
            .unwrap()
            .clone()
            .expect("metadata output attached")
    }
}

struct FakeService {
    log: Arc<CameraLog>,
}

impl CaptureService for FakeService {
    type Session = FakeSession;

    fn enumerate_cameras(&self) -> Vec<CameraDevice> {
        if self.log.no_device.load(Ordering::SeqCst) {
            return Vec::new();
        }
        vec![CameraDevice {
            name: "Fake Camera".to_string(),
            path: "/dev/fake0".to_string(),
            position: Some(CameraPosition::Back),
            v4l2_path: None,
        }]
    }

    fn open_input(&self, device: &CameraDevice) -> BackendResult<CaptureInput> {
        Ok(CaptureInput {
            device: device.clone(),
            max_zoom_factor: 8.0,
        })
    }

    fn new_session(&self) -> FakeSession {
        FakeSession {
            log: Arc::clone(&self.log),
            input: None,
            outputs: Vec::new(),
            running: AtomicBool::new(false),
        }
    }
}

struct FakeSession {
    log: Arc<CameraLog>,
    input: Option<CaptureInput>,
    outputs: Vec<SessionOutput>,
    running: AtomicBool,
}

impl CaptureSession for FakeSession {
    fn can_add_input(&self, _input: &CaptureInput) -> bool {
        self.input.is_none() && !self.log.reject_input.load(Ordering::SeqCst)
    }

    fn add_input(&mut self, input: CaptureInput) {
        self.log.inputs_added.fetch_add(1, Ordering::SeqCst);
        self.input = Some(input);
    }

    fn can_add_output(&self, kind: OutputKind) -> bool {
        !self.outputs.iter().any(|o| o.kind == kind)
    }

    fn add_output(&mut self, output: SessionOutput) {
        if output.kind == OutputKind::Metadata {
            *self.log.metadata.lock().unwrap() = Some(output.sender.clone());
        }
        self.outputs.push(output);
    }

    fn start_running(&self) -> BackendResult<()> {
        if self.log.fail_start.load(Ordering::SeqCst) {
            return Err(BackendError::Other("camera busy".to_string()));
        }
        if !self.running.swap(true, Ordering::SeqCst) {
            self.log.starts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn stop_running(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.log.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn set_zoom_factor(&self, factor: f32) -> BackendResult<()> {
        *self.log.zoom.lock().unwrap() = Some(factor);
        Ok(())
    }

    fn max_zoom_factor(&self) -> f32 {
        self.input.as_ref().map(|i| i.max_zoom_factor).unwrap_or(1.0)
    }
}

/// Reads QR codes only; every frame carries one code naming the frame width
struct FakeDecoder;

impl MetadataDecoder for FakeDecoder {
    fn supported_symbologies(&self) -> &[Symbology] {
        &[Symbology::Qr]
    }

    fn decode(&self, frame: &CameraFrame, _roi: &RegionOfInterest) -> Vec<MetadataObject> {
        vec![MetadataObject::readable(
            format!("frame-width-{}", frame.width),
            Symbology::Qr,
        )]
    }
}

struct FakeAuthority {
    status: AuthorizationStatus,
    grant: bool,
    requests: Arc<AtomicUsize>,
}

impl PermissionAuthority for FakeAuthority {
    fn current_status(&self) -> AuthorizationStatus {
        self.status
    }

    fn request_access(&self) -> impl Future<Output = bool> + Send {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let grant = self.grant;
        async move { grant }
    }
}

type Controller = ScanSessionController<FakeService, FakeDecoder, FakeAuthority>;

struct Harness {
    controller: Controller,
    log: Arc<CameraLog>,
    requests: Arc<AtomicUsize>,
}

fn harness(status: AuthorizationStatus, options: ControllerOptions) -> Harness {
    let log = Arc::new(CameraLog::default());
    let requests = Arc::new(AtomicUsize::new(0));
    let controller = ScanSessionController::new(
        FakeService {
            log: Arc::clone(&log),
        },
        FakeDecoder,
        FakeAuthority {
            status,
            grant: true,
            requests: Arc::clone(&requests),
        },
        options,
        Handle::current(),
    );
    Harness {
        controller,
        log,
        requests,
    }
}

fn authorized() -> Harness {
    harness(AuthorizationStatus::Authorized, ControllerOptions::default())
}

fn batch(controller: &Controller, payloads: &[&str]) -> MetadataBatch {
    MetadataBatch {
        generation: controller.generation(),
        objects: payloads
            .iter()
            .map(|p| MetadataObject::readable(*p, Symbology::Qr))
            .collect(),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_denied_permission_never_attaches() {
    for status in [AuthorizationStatus::Denied, AuthorizationStatus::Restricted] {
        let mut h = harness(status, ControllerOptions::default());

        assert_eq!(h.controller.activate(), Err(ScanError::PermissionDenied));
        assert_eq!(h.controller.configure(), Err(ScanError::PermissionDenied));

        assert_eq!(h.controller.permission(), PermissionState::Denied);
        assert_eq!(*h.controller.state(), ScanState::PermissionDenied);
        assert_eq!(h.controller.alert(), Some(&Alert::CameraDisabled));
        assert!(!h.controller.is_configured());
        assert_eq!(h.log.inputs_added.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_configure_without_decision_leaves_state() {
    let mut h = harness(
        AuthorizationStatus::NotDetermined,
        ControllerOptions::default(),
    );

    assert_eq!(h.controller.configure(), Err(ScanError::PermissionDenied));
    assert_eq!(*h.controller.state(), ScanState::Uninitialized);
    assert_eq!(h.log.inputs_added.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_prompt_answer_allows_configuration() {
    let mut h = harness(
        AuthorizationStatus::NotDetermined,
        ControllerOptions::default(),
    );

    assert_eq!(h.controller.activate(), Ok(()));
    assert_eq!(h.controller.permission(), PermissionState::Unknown);
    assert!(!h.controller.is_configured());

    // A second query while the prompt is open doesn't prompt again
    h.controller.request_permission();

    let event = h.controller.next_event().await.unwrap();
    assert_eq!(event, ScanEvent::PermissionResolved(true));
    h.controller.handle_event(event);
    assert_eq!(h.requests.load(Ordering::SeqCst), 1);
    assert_eq!(h.controller.permission(), PermissionState::Granted);

    h.controller.activate().unwrap();
    assert!(h.controller.is_configured());
    assert!(h.controller.is_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_twice_runs_one_session() {
    let mut h = authorized();
    h.controller.activate().unwrap();
    let generation = h.controller.generation();

    h.controller.start();
    h.controller.idle().await;

    assert_eq!(h.log.starts.load(Ordering::SeqCst), 1);
    assert_eq!(h.controller.generation(), generation);
    assert_eq!(*h.controller.state(), ScanState::Running);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_when_not_running_is_noop() {
    let mut h = authorized();
    // Before configuration
    h.controller.stop();

    h.controller.request_permission();
    h.controller.configure().unwrap();
    h.controller.stop();
    h.controller.idle().await;

    assert_eq!(h.log.stops.load(Ordering::SeqCst), 0);
    assert_eq!(*h.controller.state(), ScanState::Idle);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_only_first_object_is_published() {
    let mut h = authorized();
    h.controller.activate().unwrap();

    let published = h.controller.on_detected(batch(&h.controller, &["first", "second"]));
    assert!(published);

    let result = h.controller.scanned_code().unwrap();
    assert_eq!(result.payload, "first");
    assert_eq!(result.symbology, Symbology::Qr);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_detection_stops_session_and_ignores_later_batches() {
    let mut h = authorized();
    h.controller.activate().unwrap();
    let mut results = h.controller.subscribe();

    h.controller
        .handle_event(ScanEvent::Metadata(batch(&h.controller, &["code-1"])));
    h.controller.idle().await;

    assert_eq!(*h.controller.state(), ScanState::Detected);
    assert!(!h.controller.is_running());
    assert_eq!(h.log.stops.load(Ordering::SeqCst), 1);
    assert!(results.has_changed().unwrap());
    assert_eq!(
        results.borrow_and_update().as_ref().map(|r| r.payload.as_str()),
        Some("code-1")
    );

    // Frames decoded before the stop took effect
    assert!(!h.controller.on_detected(batch(&h.controller, &["code-2"])));
    assert_eq!(h.controller.scanned_code().unwrap().payload, "code-1");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_detected_becomes_idle_once_stopped() {
    let mut h = authorized();
    h.controller.activate().unwrap();

    h.controller.on_detected(batch(&h.controller, &["code-1"]));
    assert_eq!(*h.controller.state(), ScanState::Detected);

    h.controller.idle().await;
    h.controller.process_pending_events();

    assert_eq!(*h.controller.state(), ScanState::Idle);
    assert_eq!(h.controller.scanned_code().unwrap().payload, "code-1");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_frames_queued_before_restart_are_not_published() {
    let mut h = authorized();
    h.controller.activate().unwrap();
    let mut frames = h.log.metadata_frames();

    h.controller.on_detected(batch(&h.controller, &["code-1"]));
    // Captured in the first run, still queued when the user rescans
    let queued = CameraFrame::from_rgba(1, 1, vec![0; 4]);
    std::thread::sleep(Duration::from_millis(2));
    h.controller.start();

    frames.try_send(queued).unwrap();
    frames
        .try_send(CameraFrame::from_rgba(2, 1, vec![0; 8]))
        .unwrap();

    // The worker decodes in order, so the first batch tells what survived
    let first = loop {
        let event = tokio::time::timeout(Duration::from_secs(5), h.controller.next_event())
            .await
            .expect("metadata output stalled")
            .expect("event queue closed");
        match event {
            ScanEvent::Metadata(batch) => break batch,
            other => h.controller.handle_event(other),
        }
    };
    assert_eq!(first.generation, h.controller.generation());
    assert_eq!(first.objects[0].payload.as_deref(), Some("frame-width-2"));

    assert!(h.controller.on_detected(first));
    assert_eq!(
        h.controller.scanned_code().unwrap().payload,
        "frame-width-2"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restart_clears_result_and_drops_stale_batches() {
    let mut h = authorized();
    h.controller.activate().unwrap();
    let stale = batch(&h.controller, &["old"]);
    h.controller.on_detected(batch(&h.controller, &["code-1"]));

    h.controller.start();
    assert!(h.controller.scanned_code().is_none());
    assert_eq!(*h.controller.state(), ScanState::Running);

    assert!(!h.controller.on_detected(stale));
    assert!(h.controller.on_detected(batch(&h.controller, &["code-2"])));
    assert_eq!(h.controller.scanned_code().unwrap().payload, "code-2");

    h.controller.idle().await;
    assert_eq!(h.log.starts.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreadable_first_object_is_skipped() {
    let mut h = authorized();
    h.controller.activate().unwrap();

    let batch = MetadataBatch {
        generation: h.controller.generation(),
        objects: vec![
            MetadataObject::unreadable(Symbology::Qr),
            MetadataObject::readable("second", Symbology::Qr),
        ],
    };
    assert!(!h.controller.on_detected(batch));
    assert!(h.controller.scanned_code().is_none());
    assert!(h.controller.is_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_continuous_mode_suppresses_duplicates() {
    let mut h = harness(
        AuthorizationStatus::Authorized,
        ControllerOptions {
            continuous: true,
            ..ControllerOptions::default()
        },
    );
    let feedback_count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&feedback_count);
    h.controller = h.controller.with_feedback(Arc::new(move |_: &DecodedResult| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    h.controller.activate().unwrap();

    assert!(h.controller.on_detected(batch(&h.controller, &["a"])));
    assert!(!h.controller.on_detected(batch(&h.controller, &["a"])));
    assert!(h.controller.on_detected(batch(&h.controller, &["b"])));
    assert!(h.controller.on_detected(batch(&h.controller, &["a"])));

    assert!(h.controller.is_running());
    assert_eq!(*h.controller.state(), ScanState::Running);
    assert_eq!(feedback_count.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_zero_size_region_is_clamped() {
    let mut h = authorized();
    h.controller.activate().unwrap();

    // Without a layout the full frame is used
    let roi = h.controller.update_region_of_interest(Rect::new(10.0, 10.0, 50.0, 50.0));
    assert!(roi.is_full());

    h.controller.set_preview_layout(PreviewLayer::new(
        Size::new(100.0, 100.0),
        Size::new(100.0, 100.0),
    ));
    // The stored rectangle is re-applied with the new layout
    let roi = h.controller.region_of_interest();
    assert!((roi.x - 0.1).abs() < 1e-4);
    assert!((roi.width - 0.5).abs() < 1e-4);

    let roi = h.controller.update_region_of_interest(Rect::new(40.0, 40.0, 0.0, 0.0));
    assert!(roi.is_full());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_setup_failure_can_be_retried() {
    let mut h = authorized();
    h.log.reject_input.store(true, Ordering::SeqCst);

    let err = h.controller.activate().unwrap_err();
    assert!(matches!(err, ScanError::AttachRejected(_)));
    assert!(matches!(h.controller.state(), ScanState::Failed(_)));
    assert!(matches!(h.controller.alert(), Some(Alert::SetupFailed(_))));
    assert!(!h.controller.is_configured());

    h.log.reject_input.store(false, Ordering::SeqCst);
    h.controller.configure().unwrap();
    assert_eq!(*h.controller.state(), ScanState::Idle);
    assert!(h.controller.alert().is_none());
    assert_eq!(h.controller.device().unwrap().name, "Fake Camera");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_camera_fails_setup() {
    let mut h = authorized();
    h.log.no_device.store(true, Ordering::SeqCst);

    assert_eq!(h.controller.activate(), Err(ScanError::NoDeviceFound));
    assert_eq!(
        *h.controller.state(),
        ScanState::Failed(ScanError::NoDeviceFound)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unsupported_symbologies_fail_setup() {
    let mut h = harness(
        AuthorizationStatus::Authorized,
        ControllerOptions {
            symbologies: vec![Symbology::Ean13, Symbology::Code128],
            ..ControllerOptions::default()
        },
    );

    let err = h.controller.activate().unwrap_err();
    assert!(matches!(err, ScanError::DecoderConfigError(_)));
    assert!(!h.controller.is_configured());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_failure_tears_session_down() {
    let mut h = authorized();
    h.log.fail_start.store(true, Ordering::SeqCst);
    h.controller.activate().unwrap();

    let event = h.controller.next_event().await.unwrap();
    assert!(matches!(event, ScanEvent::SessionFailed { .. }));
    h.controller.handle_event(event);

    assert!(matches!(h.controller.state(), ScanState::Failed(_)));
    assert!(!h.controller.is_running());
    assert!(!h.controller.is_configured());
    assert!(matches!(h.controller.alert(), Some(Alert::SetupFailed(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_zoom_is_limited_by_session_and_options() {
    let mut h = authorized();
    h.controller.activate().unwrap();

    for _ in 0..5 {
        h.controller.zoom_by(100.0);
    }
    // The camera allows 8x, the options only 4x
    assert_eq!(h.controller.zoom_factor(), 4.0);

    h.controller.idle().await;
    assert_eq!(*h.log.zoom.lock().unwrap(), Some(4.0));

    assert!(h.controller.zoom_by(-1000.0) < 4.0);
    for _ in 0..5 {
        h.controller.zoom_by(-1000.0);
    }
    assert_eq!(h.controller.zoom_factor(), 1.0);
}
