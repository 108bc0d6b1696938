// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the scanner

use crate::backends::camera::types::BackendError;
use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// Scan session errors
    Scan(ScanError),
    /// Camera backend errors
    Backend(BackendError),
    /// Configuration errors
    Config(String),
    /// Generic error with message
    Other(String),
}

/// Errors that end a scan session attempt
///
/// None of these are retried automatically. The controller surfaces them as
/// a user-visible state and waits for an explicit `configure()` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// Camera access was refused or is restricted
    PermissionDenied,
    /// No camera device matched the requested position
    NoDeviceFound,
    /// The session refused to attach the camera input or the metadata output
    AttachRejected(String),
    /// The metadata output could not be configured for the requested symbologies
    DecoderConfigError(String),
}

impl ScanError {
    /// Short message suitable for an alert
    pub fn user_message(&self) -> &'static str {
        match self {
            ScanError::PermissionDenied => "Please enable camera access for QR Scanner",
            ScanError::NoDeviceFound => "No camera was found",
            ScanError::AttachRejected(_) | ScanError::DecoderConfigError(_) => {
                "The camera could not be set up for scanning"
            }
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Scan(e) => write!(f, "Scan error: {}", e),
            AppError::Backend(e) => write!(f, "Camera error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::PermissionDenied => write!(f, "Camera permission denied"),
            ScanError::NoDeviceFound => write!(f, "No camera device found"),
            ScanError::AttachRejected(msg) => write!(f, "Session rejected attachment: {}", msg),
            ScanError::DecoderConfigError(msg) => {
                write!(f, "Decoder configuration failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for ScanError {}

impl From<ScanError> for AppError {
    fn from(err: ScanError) -> Self {
        AppError::Scan(err)
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        AppError::Backend(err)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Map a backend failure during `configure()` onto the scan taxonomy
impl From<BackendError> for ScanError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::DeviceNotFound(_) | BackendError::NotAvailable(_) => {
                ScanError::NoDeviceFound
            }
            other => ScanError::AttachRejected(other.to_string()),
        }
    }
}
