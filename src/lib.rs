// SPDX-License-Identifier: GPL-3.0-only

//! QR Scanner - camera-based QR code scanning for Linux
//!
//! This library provides the scanning core: a capture session controller
//! that handles camera permission, session setup and result publication,
//! plus the camera backends and a terminal front end.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`scanner`]: Session controller, decoder and preview geometry
//! - [`backends`]: Camera capture and permission backends
//! - [`terminal`]: Terminal scanner screen
//! - [`config`]: User configuration handling
//!
//! # Example
//!
//! ```ignore
//! let mut controller = ScanSessionController::new(
//!     GstCaptureService::new(CameraBackendType::PipeWire),
//!     QrDecoder::new(),
//!     SystemAuthority::detect(),
//!     ControllerOptions::default(),
//!     runtime.handle().clone(),
//! );
//! controller.activate()?;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod scanner;
pub mod terminal;

// Re-export commonly used types
pub use config::Config;
pub use errors::{AppError, AppResult, ScanError};
pub use scanner::{ControllerOptions, DecodedResult, ScanSessionController, ScanState};
