// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for scanning
//!
//! This module provides command-line functionality for:
//! - Running the terminal scanner
//! - Listing available cameras
//! - Decoding codes in image files
//! - Headless scanning from a camera

use qr_scanner::backends::camera::types::CameraBackendType;
use qr_scanner::backends::camera::{CameraDevice, CaptureService, GstCaptureService};
use qr_scanner::backends::permission::SystemAuthority;
use qr_scanner::backends::virtual_camera::{VirtualCaptureService, file_source};
use qr_scanner::config::Config;
use qr_scanner::scanner::{
    ControllerOptions, DecodedResult, MetadataDecoder, PayloadAction, PermissionState, QrDecoder,
    RegionOfInterest, ScanEvent, ScanSessionController, ScanState, feedback,
};
use qr_scanner::terminal::{self, ScreenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tracing::{info, warn};

/// Where a scan takes its frames from
enum Source {
    Camera(Option<usize>),
    Image(PathBuf),
}

impl Source {
    fn new(camera: Option<usize>, image: Option<PathBuf>) -> Self {
        match image {
            Some(path) => Source::Image(path),
            None => Source::Camera(camera),
        }
    }
}

/// Run the terminal scanner
pub fn run_terminal(
    camera: Option<usize>,
    continuous: bool,
    image: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load();
    let runtime = Runtime::new()?;
    let screen = ScreenOptions::from(&config);

    let mut options = config.controller_options();
    options.continuous |= continuous;

    match Source::new(camera, image) {
        Source::Image(path) => {
            let mut controller = build_controller(
                VirtualCaptureService::new(vec![path]),
                SystemAuthority::AlwaysGranted,
                options,
                &config,
                &runtime,
            );
            terminal::run(&mut controller, screen, runtime.handle())
        }
        Source::Camera(index) => {
            let service = camera_service(&config)?;
            if let Some(index) = index {
                options.device_path = Some(camera_at(&service, index)?.path);
            }
            let mut controller = build_controller(
                service,
                SystemAuthority::detect(),
                options,
                &config,
                &runtime,
            );
            let result = terminal::run(&mut controller, screen, runtime.handle());
            remember_camera(&mut config, controller.device());
            result
        }
    }
}

/// List all available cameras
pub fn list_cameras() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();
    let service = camera_service(&config)?;
    let cameras = service.enumerate_cameras();

    println!("Backend: {}", service.backend());
    if cameras.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for (index, camera) in cameras.iter().enumerate() {
        let marker = if config.last_camera_path.as_deref() == Some(camera.path.as_str()) {
            " (last used)"
        } else {
            ""
        };
        println!("  [{}] {}{}", index, camera.name, marker);
        if !camera.path.is_empty() {
            println!("      Path: {}", camera.path);
        }
        if let Some(position) = camera.position {
            println!("      Position: {:?}", position);
        }
        println!();
    }

    Ok(())
}

/// Decode codes in image files
pub fn decode_images(images: Vec<PathBuf>, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();
    let decoder = QrDecoder::with_max_dimension(config.decoder_max_dimension);

    let mut found = 0usize;
    for path in &images {
        let frame = match file_source::load_image_as_frame(path) {
            Ok(frame) => frame,
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                continue;
            }
        };

        let objects = decoder.decode(&frame, &RegionOfInterest::FULL);
        let readable: Vec<_> = objects
            .into_iter()
            .filter(|o| config.symbologies.contains(&o.symbology))
            .filter_map(|o| Some((o.payload?, o.symbology, o.bounds)))
            .collect();

        if readable.is_empty() {
            eprintln!("{}: no code found", path.display());
            continue;
        }
        for (payload, symbology, bounds) in readable {
            found += 1;
            let result = DecodedResult::new(payload, symbology, bounds);
            if json {
                println!("{}", result_json(&result, Some(path)));
            } else {
                println!("{}: {}", path.display(), describe(&result));
            }
        }
    }

    if found == 0 {
        return Err("No codes found".into());
    }
    Ok(())
}

/// Options of a headless scan
pub struct ScanArgs {
    pub camera: Option<usize>,
    pub continuous: bool,
    pub timeout: u64,
    pub image: Option<PathBuf>,
    pub json: bool,
}

/// Scan from a camera without a UI, printing payloads to stdout
pub fn scan(args: ScanArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();
    let runtime = Runtime::new()?;

    let mut options = config.controller_options();
    options.continuous |= args.continuous;
    options.preview = false;

    match Source::new(args.camera, args.image.clone()) {
        Source::Image(path) => {
            let mut controller = build_controller(
                VirtualCaptureService::new(vec![path]),
                SystemAuthority::AlwaysGranted,
                options,
                &config,
                &runtime,
            );
            scan_loop(&mut controller, &runtime, &args)
        }
        Source::Camera(index) => {
            let service = camera_service(&config)?;
            if let Some(index) = index {
                options.device_path = Some(camera_at(&service, index)?.path);
            }
            let mut controller = build_controller(
                service,
                SystemAuthority::detect(),
                options,
                &config,
                &runtime,
            );
            scan_loop(&mut controller, &runtime, &args)
        }
    }
}

fn scan_loop<S: CaptureService>(
    controller: &mut ScanSessionController<S, QrDecoder, SystemAuthority>,
    runtime: &Runtime,
    args: &ScanArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    // Set up Ctrl+C handler
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    let mut results = controller.subscribe();
    controller.activate()?;
    if let Some(device) = controller.device() {
        eprintln!("Scanning with {} (Ctrl+C to stop)", device.name);
    }

    let start = Instant::now();
    let timeout = Duration::from_secs(args.timeout);
    let mut found = 0usize;

    let outcome: Result<(), Box<dyn std::error::Error>> = loop {
        if stop_flag.load(Ordering::SeqCst) {
            eprintln!("Stopping...");
            break Ok(());
        }
        if args.timeout > 0 && start.elapsed() >= timeout {
            break if found == 0 {
                Err(format!("No code detected within {} seconds", args.timeout).into())
            } else {
                Ok(())
            };
        }

        let event = runtime.block_on(async {
            tokio::time::timeout(Duration::from_millis(100), controller.next_event()).await
        });
        if let Ok(Some(event)) = event {
            let permission_answer = matches!(event, ScanEvent::PermissionResolved(_));
            controller.handle_event(event);
            if permission_answer && controller.permission() == PermissionState::Granted {
                controller.activate()?;
            }
        }

        match controller.state() {
            ScanState::PermissionDenied => break Err("Camera permission denied".into()),
            ScanState::Failed(e) => break Err(e.clone().into()),
            _ => {}
        }

        if results.has_changed().unwrap_or(false) {
            let latest = results.borrow_and_update().clone();
            if let Some(result) = latest {
                found += 1;
                if args.json {
                    println!("{}", result_json(&result, None));
                } else {
                    println!("{}", describe(&result));
                }
                if !args.continuous {
                    break Ok(());
                }
            }
        }
    };

    controller.stop();
    runtime.block_on(controller.idle());
    outcome
}

fn build_controller<S: CaptureService>(
    service: S,
    authority: SystemAuthority,
    options: ControllerOptions,
    config: &Config,
    runtime: &Runtime,
) -> ScanSessionController<S, QrDecoder, SystemAuthority> {
    let decoder = QrDecoder::with_max_dimension(config.decoder_max_dimension);
    let controller = ScanSessionController::new(
        service,
        decoder,
        authority,
        options,
        runtime.handle().clone(),
    );
    if config.feedback_enabled {
        controller.with_feedback(feedback::system(runtime.handle().clone()))
    } else {
        controller
    }
}

fn camera_service(config: &Config) -> Result<GstCaptureService, Box<dyn std::error::Error>> {
    if config.backend == CameraBackendType::Virtual {
        return Err("The virtual camera needs an image, pass --image PATH".into());
    }
    Ok(GstCaptureService::new(config.backend))
}

fn camera_at(
    service: &GstCaptureService,
    index: usize,
) -> Result<CameraDevice, Box<dyn std::error::Error>> {
    let cameras = service.enumerate_cameras();
    if cameras.is_empty() {
        return Err("No cameras found".into());
    }
    cameras.get(index).cloned().ok_or_else(|| {
        format!(
            "Camera index {} out of range (0-{})",
            index,
            cameras.len() - 1
        )
        .into()
    })
}

/// Store the camera that was used so the next run picks it again
fn remember_camera(config: &mut Config, device: Option<&CameraDevice>) {
    let Some(device) = device else {
        return;
    };
    if device.path.is_empty() || config.last_camera_path.as_deref() == Some(device.path.as_str())
    {
        return;
    }

    config.last_camera_path = Some(device.path.clone());
    match config.save() {
        Ok(()) => info!(path = %device.path, "Remembered camera"),
        Err(e) => warn!(error = %e, "Failed to save configuration"),
    }
}

fn describe(result: &DecodedResult) -> String {
    let action = PayloadAction::parse(&result.payload);
    format!(
        "[{}] {} ({})",
        result.symbology,
        result.payload,
        action.action_label()
    )
}

fn result_json(result: &DecodedResult, image: Option<&PathBuf>) -> serde_json::Value {
    let action = PayloadAction::parse(&result.payload);
    let mut value = serde_json::json!({
        "payload": result.payload,
        "symbology": result.symbology,
        "action": action.action_label(),
        "open": action.open_target(),
        "scanned_at": result.scanned_at.to_rfc3339(),
    });
    if let Some(path) = image {
        value["image"] = serde_json::Value::from(path.display().to_string());
    }
    value
}
