// SPDX-License-Identifier: GPL-3.0-only

//! Barcode scanning on top of a capture session
//!
//! - [`controller`]: permission, session lifecycle and result publication
//! - [`output`]: frame worker feeding the decoder
//! - [`decoder`]: the decoder seam and the `rqrr` implementation
//! - [`geometry`]: preview layout, orientation and zoom math
//! - [`payload`]: classification of decoded text
//! - [`feedback`]: haptic/bell feedback on detection
//! - [`orientation`]: accelerometer orientation

pub mod controller;
pub mod decoder;
pub mod feedback;
pub mod geometry;
pub mod orientation;
pub mod output;
pub mod payload;
pub mod types;

pub use controller::{ControllerOptions, ScanSessionController};
pub use decoder::{MetadataDecoder, QrDecoder};
pub use geometry::{
    InterfaceOrientation, PreviewLayer, Rect, Size, VideoGravity, VideoOrientation, compute_zoom,
};
pub use output::MetadataOutput;
pub use payload::PayloadAction;
pub use types::*;
