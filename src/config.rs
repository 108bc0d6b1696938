// SPDX-License-Identifier: GPL-3.0-only

//! User configuration
//!
//! Stored as JSON in `$XDG_CONFIG_HOME/qr-scanner/config.json`. Unknown or
//! missing fields take their defaults, so older files keep loading.

use crate::backends::camera::{CameraBackendType, CameraPosition};
use crate::constants::{APP_DIR_NAME, decoder, scan_frame, zoom};
use crate::errors::AppResult;
use crate::scanner::{ControllerOptions, Symbology, VideoGravity};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Config file name inside the app config directory
pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera backend to use (PipeWire or V4L2)
    pub backend: CameraBackendType,
    /// Camera placement to prefer when no camera was used before
    pub camera_position: CameraPosition,
    /// Last used camera device path
    pub last_camera_path: Option<String>,
    /// Symbologies reported by the scanner
    pub symbologies: Vec<Symbology>,
    /// Keep scanning after a code was found
    pub continuous_scan: bool,
    /// Vibrate or beep when a code is found
    pub feedback_enabled: bool,
    /// Upper bound for pinch/scroll zoom
    pub max_zoom: f32,
    /// Scan frame side as a fraction of the preview's shorter side
    pub scan_frame_size: f32,
    /// How the preview fills the view
    pub preview_gravity: VideoGravity,
    /// Mirror camera preview horizontally (selfie mode)
    pub mirror_preview: bool,
    /// Frames are downscaled to this size before decoding
    pub decoder_max_dimension: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: CameraBackendType::default(),
            camera_position: CameraPosition::Back,
            last_camera_path: None,
            symbologies: Symbology::ALL.to_vec(),
            continuous_scan: false,
            feedback_enabled: true,
            max_zoom: zoom::DEFAULT_MAX_FACTOR,
            scan_frame_size: scan_frame::DEFAULT_FRACTION,
            preview_gravity: VideoGravity::AspectFill,
            // Back cameras are not mirrored
            mirror_preview: false,
            decoder_max_dimension: decoder::DEFAULT_MAX_DIMENSION,
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("No config directory, using default configuration");
                Self::default()
            }
        }
    }

    /// Load from `path`; a missing or unreadable file yields the defaults
    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read config, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str::<Config>(&contents) {
            Ok(config) => {
                debug!(path = %path.display(), "Loaded configuration");
                config.sanitized()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid config, using defaults");
                Self::default()
            }
        }
    }

    /// Save to the default location
    pub fn save(&self) -> AppResult<()> {
        let path = Self::default_path().ok_or("No config directory available")?;
        self.save_to(&path)
    }

    /// Save to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Replace out-of-range values with defaults
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !self.max_zoom.is_finite() || self.max_zoom < zoom::MIN_FACTOR {
            self.max_zoom = defaults.max_zoom;
        }
        if !(self.scan_frame_size > 0.0 && self.scan_frame_size <= 1.0) {
            self.scan_frame_size = defaults.scan_frame_size;
        }
        if self.symbologies.is_empty() {
            self.symbologies = defaults.symbologies;
        }
        if self.decoder_max_dimension == 0 {
            self.decoder_max_dimension = defaults.decoder_max_dimension;
        }
        self
    }

    /// Scanner options derived from this configuration
    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            position: self.camera_position,
            device_path: self.last_camera_path.clone(),
            symbologies: self.symbologies.clone(),
            continuous: self.continuous_scan,
            max_zoom: self.max_zoom,
            preview: true,
        }
    }
}
