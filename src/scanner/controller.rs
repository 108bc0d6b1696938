// SPDX-License-Identifier: GPL-3.0-only

//! Scan session controller
//!
//! Owns the lifecycle of one capture session:
//!
//! ```text
//! Uninitialized ──► Configuring ──► Idle ◄──────────┐
//!       │                │            │ start()     │ stopped
//!       ▼                ▼            ▼             │
//! PermissionDenied     Failed      Running ──► Detected
//! ```
//!
//! `Detected` lasts until the worker reports the session stopped; the
//! published result stays available in `Idle` until the next `start()`.
//!
//! The controller lives on the UI thread. Everything slow happens elsewhere:
//! session start/stop and zoom run on a serialized worker on the blocking
//! pool, decoding runs in the metadata output, and the permission prompt runs
//! on the runtime. Their results come back as [`ScanEvent`]s which the owner
//! applies with [`ScanSessionController::handle_event`].

use super::decoder::MetadataDecoder;
use super::feedback::{self, FeedbackHook};
use super::geometry::{InterfaceOrientation, PreviewLayer, Rect, VideoOrientation, compute_zoom};
use super::output::MetadataOutput;
use super::types::{
    Alert, AuthorizationStatus, DecodedResult, MetadataBatch, PermissionState, RegionOfInterest,
    ScanEvent, ScanState, Symbology,
};
use crate::backends::camera::{
    CameraDevice, CameraPosition, CaptureService, CaptureSession, FrameReceiver, OutputKind,
    SessionOutput,
};
use crate::backends::permission::PermissionAuthority;
use crate::constants::zoom;
use crate::errors::ScanError;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Scanner settings taken from the configuration and CLI
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerOptions {
    /// Camera placement to look for
    pub position: CameraPosition,
    /// Preferred camera (device path), falls back to `position` when missing
    pub device_path: Option<String>,
    /// Symbologies to report
    pub symbologies: Vec<Symbology>,
    /// Keep scanning after a detection
    pub continuous: bool,
    /// Upper bound for the zoom factor
    pub max_zoom: f32,
    /// Attach a preview output
    pub preview: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            position: CameraPosition::Back,
            device_path: None,
            symbologies: Symbology::ALL.to_vec(),
            continuous: false,
            max_zoom: zoom::DEFAULT_MAX_FACTOR,
            preview: true,
        }
    }
}

/// Work for the session worker
enum SessionCommand {
    Start { generation: u64 },
    Stop { generation: u64 },
    Zoom(f32),
    /// Answered once every earlier command has been applied
    Barrier(oneshot::Sender<()>),
}

/// A fully attached session and the tasks serving it
struct ConfiguredSession<D: MetadataDecoder> {
    device: CameraDevice,
    output: MetadataOutput<D>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    preview: Option<FrameReceiver>,
    max_zoom: f32,
    _worker: JoinHandle<()>,
    _decoder: JoinHandle<()>,
}

/// Drives permission, configuration and running state of the scanner
pub struct ScanSessionController<S, D, A>
where
    S: CaptureService,
    D: MetadataDecoder,
    A: PermissionAuthority,
{
    service: Arc<S>,
    decoder: Arc<D>,
    authority: Arc<A>,
    options: ControllerOptions,
    runtime: Handle,

    events_tx: mpsc::UnboundedSender<ScanEvent>,
    events_rx: mpsc::UnboundedReceiver<ScanEvent>,
    results: watch::Sender<Option<DecodedResult>>,
    feedback: FeedbackHook,

    state: ScanState,
    permission: PermissionState,
    permission_pending: bool,
    alert: Option<Alert>,
    session: Option<ConfiguredSession<D>>,
    running: bool,
    generation: u64,
    last_payload: Option<String>,

    layout: Option<PreviewLayer>,
    scan_rect: Option<Rect>,
    roi: RegionOfInterest,
    zoom: f32,
}

impl<S, D, A> ScanSessionController<S, D, A>
where
    S: CaptureService,
    D: MetadataDecoder,
    A: PermissionAuthority,
{
    /// Create a controller; background work is spawned on `runtime`
    pub fn new(
        service: S,
        decoder: D,
        authority: A,
        options: ControllerOptions,
        runtime: Handle,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (results, _) = watch::channel(None);

        Self {
            service: Arc::new(service),
            decoder: Arc::new(decoder),
            authority: Arc::new(authority),
            options,
            runtime,
            events_tx,
            events_rx,
            results,
            feedback: feedback::silent(),
            state: ScanState::Uninitialized,
            permission: PermissionState::Unknown,
            permission_pending: false,
            alert: None,
            session: None,
            running: false,
            generation: 0,
            last_payload: None,
            layout: None,
            scan_rect: None,
            roi: RegionOfInterest::FULL,
            zoom: zoom::MIN_FACTOR,
        }
    }

    /// Run `hook` for every published result
    pub fn with_feedback(mut self, hook: FeedbackHook) -> Self {
        self.feedback = hook;
        self
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    pub fn permission(&self) -> PermissionState {
        self.permission
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    /// Check if the session is (being) started
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Check if a session is attached
    pub fn is_configured(&self) -> bool {
        self.session.is_some()
    }

    /// Camera the session was configured with
    pub fn device(&self) -> Option<&CameraDevice> {
        self.session.as_ref().map(|s| &s.device)
    }

    /// Run counter, incremented by every `start()`
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn alert(&self) -> Option<&Alert> {
        self.alert.as_ref()
    }

    pub fn dismiss_alert(&mut self) {
        self.alert = None;
    }

    /// Latest published result
    pub fn scanned_code(&self) -> Option<DecodedResult> {
        self.results.borrow().clone()
    }

    /// Follow published results; `None` is sent whenever a new run starts
    pub fn subscribe(&self) -> watch::Receiver<Option<DecodedResult>> {
        self.results.subscribe()
    }

    /// Take the preview frames of the configured session
    pub fn take_preview_frames(&mut self) -> Option<FrameReceiver> {
        self.session.as_mut().and_then(|s| s.preview.take())
    }

    /// Query camera authorization, prompting when it was never decided
    ///
    /// A prompt answers later through [`ScanEvent::PermissionResolved`].
    pub fn request_permission(&mut self) -> PermissionState {
        let status = self.authority.current_status();
        debug!(?status, "Camera authorization status");

        match status {
            AuthorizationStatus::Authorized => self.permission = PermissionState::Granted,
            AuthorizationStatus::Denied | AuthorizationStatus::Restricted => self.deny(),
            AuthorizationStatus::NotDetermined => {
                if !self.permission_pending {
                    self.permission_pending = true;
                    info!("Requesting camera access");

                    let authority = Arc::clone(&self.authority);
                    let events = self.events_tx.clone();
                    self.runtime.spawn(async move {
                        let granted = authority.request_access().await;
                        let _ = events.send(ScanEvent::PermissionResolved(granted));
                    });
                }
                self.permission = PermissionState::Unknown;
            }
        }

        self.permission
    }

    fn deny(&mut self) {
        warn!("Camera access denied");
        self.permission = PermissionState::Denied;
        self.state = ScanState::PermissionDenied;
        self.alert = Some(Alert::CameraDisabled);
    }

    /// Build and attach the capture session
    ///
    /// Nothing is stored unless input and outputs were all attached. After a
    /// failure the call can be repeated; once configured it is a no-op.
    pub fn configure(&mut self) -> Result<(), ScanError> {
        if self.session.is_some() {
            return Ok(());
        }
        if self.permission != PermissionState::Granted {
            debug!(permission = ?self.permission, "Not configuring without camera access");
            return Err(ScanError::PermissionDenied);
        }

        self.state = ScanState::Configuring;
        match self.build_session() {
            Ok(session) => {
                info!(
                    device = %session.device.name,
                    max_zoom = session.max_zoom,
                    "Scan session configured"
                );
                self.session = Some(session);
                self.state = ScanState::Idle;
                if matches!(self.alert, Some(Alert::SetupFailed(_))) {
                    self.alert = None;
                }
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Scan session setup failed");
                self.state = ScanState::Failed(e.clone());
                self.alert = Some(Alert::SetupFailed(e.clone()));
                Err(e)
            }
        }
    }

    fn find_device(&self) -> Option<CameraDevice> {
        if let Some(path) = &self.options.device_path {
            let preferred = self
                .service
                .enumerate_cameras()
                .into_iter()
                .find(|c| &c.path == path);
            if preferred.is_some() {
                return preferred;
            }
            debug!(path = %path, "Preferred camera missing, using default");
        }
        self.service.default_device(self.options.position)
    }

    fn build_session(&self) -> Result<ConfiguredSession<D>, ScanError> {
        let device = self.find_device().ok_or(ScanError::NoDeviceFound)?;
        let input = self.service.open_input(&device).map_err(ScanError::from)?;

        let mut session = self.service.new_session();
        if !session.can_add_input(&input) {
            return Err(ScanError::AttachRejected(format!(
                "session refused input {}",
                device.name
            )));
        }
        session.add_input(input);

        if !session.can_add_output(OutputKind::Metadata) {
            return Err(ScanError::AttachRejected(
                "session refused metadata output".to_string(),
            ));
        }
        let (metadata, metadata_frames) = SessionOutput::channel(OutputKind::Metadata);
        session.add_output(metadata);

        let output = MetadataOutput::new(Arc::clone(&self.decoder), &self.options.symbologies)?;
        output.set_region_of_interest(self.roi);
        output.set_generation(self.generation);

        let preview = if self.options.preview && session.can_add_output(OutputKind::Preview) {
            let (preview, frames) = SessionOutput::channel(OutputKind::Preview);
            session.add_output(preview);
            Some(frames)
        } else {
            None
        };

        let max_zoom = session
            .max_zoom_factor()
            .min(self.options.max_zoom)
            .max(zoom::MIN_FACTOR);

        let decoder = output.spawn(&self.runtime, metadata_frames, self.events_tx.clone());
        let (commands, command_rx) = mpsc::unbounded_channel();
        let worker = spawn_session_worker(
            &self.runtime,
            Arc::new(session),
            command_rx,
            self.events_tx.clone(),
        );

        Ok(ConfiguredSession {
            device,
            output,
            commands,
            preview,
            max_zoom,
            _worker: worker,
            _decoder: decoder,
        })
    }

    /// Start scanning; no-op when already running
    ///
    /// Returns immediately, the session starts on the worker. Clears the
    /// previously published result.
    pub fn start(&mut self) {
        if self.running {
            debug!("Scan session already running");
            return;
        }
        let Some(session) = &self.session else {
            debug!("Scan session not configured, ignoring start");
            return;
        };

        self.generation += 1;
        session.output.set_generation(self.generation);
        if session
            .commands
            .send(SessionCommand::Start {
                generation: self.generation,
            })
            .is_err()
        {
            warn!("Session worker gone, reconfigure required");
            self.teardown();
            return;
        }

        info!(generation = self.generation, "Starting scan session");
        self.running = true;
        self.state = ScanState::Running;
        self.last_payload = None;
        self.results.send_replace(None);
    }

    /// Stop scanning; no-op when not running
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        if self.state == ScanState::Running {
            self.state = ScanState::Idle;
        }

        info!(generation = self.generation, "Stopping scan session");
        if let Some(session) = &self.session {
            let _ = session.commands.send(SessionCommand::Stop {
                generation: self.generation,
            });
        }
    }

    /// Future resolving once the worker applied every command sent so far
    pub fn idle(&self) -> impl Future<Output = ()> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        if let Some(session) = &self.session {
            let _ = session.commands.send(SessionCommand::Barrier(tx));
        }
        async move {
            let _ = rx.await;
        }
    }

    /// Drop the session; the worker stops it on its way out
    fn teardown(&mut self) {
        self.running = false;
        self.session = None;
    }

    /// Remember the preview geometry used to map the scan rectangle
    pub fn set_preview_layout(&mut self, layer: PreviewLayer) {
        if self.layout == Some(layer) {
            return;
        }
        self.layout = Some(layer);
        if let Some(rect) = self.scan_rect {
            self.update_region_of_interest(rect);
        }
    }

    pub fn preview_layout(&self) -> Option<&PreviewLayer> {
        self.layout.as_ref()
    }

    /// Follow a device rotation
    pub fn set_orientation(&mut self, orientation: InterfaceOrientation) {
        let video = VideoOrientation::from(orientation);
        if let Some(mut layer) = self.layout {
            layer.orientation = video;
            self.set_preview_layout(layer);
        } else {
            debug!(?orientation, "Orientation changed before preview layout");
        }
    }

    /// Restrict decoding to `rect`, given in preview coordinates
    ///
    /// Returns the region applied to the decoder. Without a preview layout
    /// the full frame is used.
    pub fn update_region_of_interest(&mut self, rect: Rect) -> RegionOfInterest {
        self.scan_rect = Some(rect);
        self.roi = match &self.layout {
            Some(layer) => layer.metadata_output_rect(rect),
            None => RegionOfInterest::FULL,
        };
        if let Some(session) = &self.session {
            session.output.set_region_of_interest(self.roi);
        }
        self.roi
    }

    pub fn region_of_interest(&self) -> RegionOfInterest {
        self.roi
    }

    /// Apply a pinch/scroll velocity and return the new zoom factor
    pub fn zoom_by(&mut self, velocity: f32) -> f32 {
        let max = self
            .session
            .as_ref()
            .map(|s| s.max_zoom)
            .unwrap_or(self.options.max_zoom);
        let factor = compute_zoom(self.zoom, velocity, max);
        if factor != self.zoom {
            debug!(from = self.zoom, to = factor, "Zoom changed");
            self.zoom = factor;
            if let Some(session) = &self.session {
                let _ = session.commands.send(SessionCommand::Zoom(factor));
            }
        }
        self.zoom
    }

    pub fn zoom_factor(&self) -> f32 {
        self.zoom
    }

    /// Handle a frame's detections
    ///
    /// Only the first object counts. Returns whether a result was published.
    pub fn on_detected(&mut self, batch: MetadataBatch) -> bool {
        if !self.running || batch.generation != self.generation {
            debug!(
                batch = batch.generation,
                current = self.generation,
                running = self.running,
                "Ignoring detections outside the current run"
            );
            return false;
        }

        let Some(first) = batch.objects.into_iter().next() else {
            return false;
        };
        let Some(payload) = first.payload else {
            debug!(symbology = %first.symbology, "First object unreadable");
            return false;
        };

        if self.options.continuous {
            if self.last_payload.as_deref() == Some(payload.as_str()) {
                return false;
            }
            self.last_payload = Some(payload.clone());
        }

        let result = DecodedResult::new(payload, first.symbology, first.bounds);
        info!(symbology = %result.symbology, payload = %result.payload, "Code detected");
        (self.feedback)(&result);
        self.results.send_replace(Some(result));

        if !self.options.continuous {
            self.stop();
            self.state = ScanState::Detected;
        }
        true
    }

    /// Apply a background result
    pub fn handle_event(&mut self, event: ScanEvent) {
        match event {
            ScanEvent::PermissionResolved(granted) => {
                self.permission_pending = false;
                if granted {
                    info!("Camera access granted");
                    self.permission = PermissionState::Granted;
                } else {
                    self.deny();
                }
            }
            ScanEvent::Metadata(batch) => {
                self.on_detected(batch);
            }
            ScanEvent::SessionStarted { generation } => {
                debug!(generation, "Scan session running");
            }
            ScanEvent::SessionStopped { generation } => {
                debug!(generation, "Scan session stopped");
                if generation == self.generation
                    && !self.running
                    && self.state == ScanState::Detected
                {
                    self.state = ScanState::Idle;
                }
            }
            ScanEvent::SessionFailed { generation, error } => {
                if generation != self.generation {
                    debug!(generation, error = %error, "Ignoring failure of an earlier run");
                    return;
                }
                let e = ScanError::AttachRejected(error);
                error!(error = %e, "Scan session failed to start");
                self.teardown();
                self.state = ScanState::Failed(e.clone());
                self.alert = Some(Alert::SetupFailed(e));
            }
        }
    }

    /// Apply every queued background result, returning how many there were
    pub fn process_pending_events(&mut self) -> usize {
        let mut count = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            count += 1;
        }
        count
    }

    /// Wait for the next background result
    ///
    /// Never returns `None` while the controller is alive.
    pub async fn next_event(&mut self) -> Option<ScanEvent> {
        self.events_rx.recv().await
    }

    /// Ask for permission, configure and start as far as currently possible
    ///
    /// Called again after the permission answer arrives.
    pub fn activate(&mut self) -> Result<(), ScanError> {
        match self.permission {
            PermissionState::Denied => return Err(ScanError::PermissionDenied),
            PermissionState::Unknown => {
                if self.request_permission() != PermissionState::Granted {
                    return match self.permission {
                        PermissionState::Denied => Err(ScanError::PermissionDenied),
                        _ => Ok(()),
                    };
                }
            }
            PermissionState::Granted => {}
        }

        self.configure()?;
        self.start();
        Ok(())
    }
}

/// Apply session commands in order on the blocking pool
///
/// Stops the session when the controller drops its end of the channel.
fn spawn_session_worker<T: CaptureSession>(
    runtime: &Handle,
    session: Arc<T>,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::UnboundedSender<ScanEvent>,
) -> JoinHandle<()> {
    runtime.spawn_blocking(move || {
        while let Some(command) = commands.blocking_recv() {
            match command {
                SessionCommand::Start { generation } => {
                    let event = match session.start_running() {
                        Ok(()) => ScanEvent::SessionStarted { generation },
                        Err(e) => ScanEvent::SessionFailed {
                            generation,
                            error: e.to_string(),
                        },
                    };
                    let _ = events.send(event);
                }
                SessionCommand::Stop { generation } => {
                    session.stop_running();
                    let _ = events.send(ScanEvent::SessionStopped { generation });
                }
                SessionCommand::Zoom(factor) => {
                    if let Err(e) = session.set_zoom_factor(factor) {
                        warn!(factor, error = %e, "Failed to apply zoom");
                    }
                }
                SessionCommand::Barrier(done) => {
                    let _ = done.send(());
                }
            }
        }

        if session.is_running() {
            session.stop_running();
        }
        debug!("Session worker finished");
    })
}
