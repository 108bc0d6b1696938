// SPDX-License-Identifier: GPL-3.0-only

//! Preview geometry, orientation and zoom
//!
//! The preview shows frames scaled into a view (the "layer") and possibly
//! rotated. The scan frame drawn on top of it lives in view coordinates,
//! while the decoder works in normalized frame coordinates. This module
//! converts between the two.

use super::types::RegionOfInterest;
use crate::constants::zoom;
use serde::{Deserialize, Serialize};

/// Orientation of the UI as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterfaceOrientation {
    #[default]
    Unknown,
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

impl InterfaceOrientation {
    /// Parse the `AccelerometerOrientation` value of iio-sensor-proxy
    pub fn from_accelerometer(value: &str) -> Self {
        match value {
            "normal" => InterfaceOrientation::Portrait,
            "bottom-up" => InterfaceOrientation::PortraitUpsideDown,
            "left-up" => InterfaceOrientation::LandscapeLeft,
            "right-up" => InterfaceOrientation::LandscapeRight,
            _ => InterfaceOrientation::Unknown,
        }
    }

    /// Next orientation when rotating clockwise (manual rotate key)
    pub fn rotated_clockwise(self) -> Self {
        match self {
            InterfaceOrientation::Unknown | InterfaceOrientation::Portrait => {
                InterfaceOrientation::LandscapeLeft
            }
            InterfaceOrientation::LandscapeLeft => InterfaceOrientation::PortraitUpsideDown,
            InterfaceOrientation::PortraitUpsideDown => InterfaceOrientation::LandscapeRight,
            InterfaceOrientation::LandscapeRight => InterfaceOrientation::Portrait,
        }
    }
}

/// Orientation applied to the preview and the decoder coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoOrientation {
    #[default]
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

impl From<InterfaceOrientation> for VideoOrientation {
    fn from(orientation: InterfaceOrientation) -> Self {
        match orientation {
            InterfaceOrientation::LandscapeLeft => VideoOrientation::LandscapeLeft,
            InterfaceOrientation::LandscapeRight => VideoOrientation::LandscapeRight,
            InterfaceOrientation::Portrait => VideoOrientation::Portrait,
            InterfaceOrientation::PortraitUpsideDown => VideoOrientation::PortraitUpsideDown,
            InterfaceOrientation::Unknown => VideoOrientation::Portrait,
        }
    }
}

impl VideoOrientation {
    /// Clockwise rotation applied to frames before display
    pub fn degrees(&self) -> u32 {
        match self {
            VideoOrientation::Portrait => 0,
            VideoOrientation::LandscapeLeft => 90,
            VideoOrientation::PortraitUpsideDown => 180,
            VideoOrientation::LandscapeRight => 270,
        }
    }

    /// Check if rotation swaps width and height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(
            self,
            VideoOrientation::LandscapeLeft | VideoOrientation::LandscapeRight
        )
    }

    /// Map a normalized display point back to normalized frame coordinates
    pub fn display_to_frame(&self, u: f32, v: f32) -> (f32, f32) {
        match self {
            VideoOrientation::Portrait => (u, v),
            VideoOrientation::LandscapeLeft => (v, 1.0 - u),
            VideoOrientation::PortraitUpsideDown => (1.0 - u, 1.0 - v),
            VideoOrientation::LandscapeRight => (1.0 - v, u),
        }
    }
}

/// How frames are fitted into the preview view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoGravity {
    /// Fill the view, cropping the overflowing edges
    #[default]
    AspectFill,
    /// Fit the whole frame, letterboxing the rest
    AspectFit,
}

/// Width and height in arbitrary units
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

/// Rectangle in view coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Square of `fraction` times the shorter side, centred in `bounds`
    ///
    /// `aspect` is the height of one unit of width in the same coordinate
    /// space (terminal cells are roughly twice as tall as wide).
    pub fn centered_square(bounds: Size, fraction: f32, aspect: f32) -> Self {
        let aspect = if aspect > 0.0 { aspect } else { 1.0 };
        let side_px = (bounds.width).min(bounds.height * aspect) * fraction.clamp(0.0, 1.0);
        let width = side_px;
        let height = side_px / aspect;
        Self {
            x: (bounds.width - width) / 2.0,
            y: (bounds.height - height) / 2.0,
            width,
            height,
        }
    }
}

/// Placement of the video inside the preview view
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PreviewLayer {
    /// Size of the view showing the preview
    pub bounds: Size,
    /// Size of the frames delivered by the session (before rotation)
    pub frame_size: Size,
    pub gravity: VideoGravity,
    pub orientation: VideoOrientation,
    /// Mirror horizontally after rotation (selfie preview)
    pub mirrored: bool,
    /// Height of one view unit relative to its width (1.0 for square pixels)
    pub pixel_aspect: f32,
}

impl PreviewLayer {
    pub fn new(bounds: Size, frame_size: Size) -> Self {
        Self {
            bounds,
            frame_size,
            gravity: VideoGravity::default(),
            orientation: VideoOrientation::default(),
            mirrored: false,
            pixel_aspect: 1.0,
        }
    }

    /// Frame size after rotation, as seen on screen
    pub fn display_size(&self) -> Size {
        if self.orientation.swaps_dimensions() {
            Size::new(self.frame_size.height, self.frame_size.width)
        } else {
            self.frame_size
        }
    }

    /// Rectangle occupied by the video in view coordinates
    ///
    /// Returns `None` while either size is unknown.
    pub fn video_rect(&self) -> Option<Rect> {
        let display = self.display_size();
        if self.bounds.is_empty() || display.is_empty() {
            return None;
        }

        let aspect = if self.pixel_aspect > 0.0 {
            self.pixel_aspect
        } else {
            1.0
        };
        // Work in square units so terminal cells don't distort the fit
        let view_w = self.bounds.width;
        let view_h = self.bounds.height * aspect;

        let scale_x = view_w / display.width;
        let scale_y = view_h / display.height;
        let scale = match self.gravity {
            VideoGravity::AspectFill => scale_x.max(scale_y),
            VideoGravity::AspectFit => scale_x.min(scale_y),
        };

        let width = display.width * scale;
        let height = display.height * scale / aspect;
        Some(Rect {
            x: (self.bounds.width - width) / 2.0,
            y: (self.bounds.height - height) / 2.0,
            width,
            height,
        })
    }

    /// Map a point in view coordinates to normalized frame coordinates
    ///
    /// Points outside the video return values outside `0..1`.
    pub fn view_point_to_frame(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let video = self.video_rect()?;
        let mut u = (x - video.x) / video.width;
        let v = (y - video.y) / video.height;
        if self.mirrored {
            u = 1.0 - u;
        }
        Some(self.orientation.display_to_frame(u, v))
    }

    /// Convert a rectangle in view coordinates into the decoder's region of interest
    ///
    /// The result is clamped to the frame; when the geometry is not known yet
    /// the full frame is returned.
    pub fn metadata_output_rect(&self, rect: Rect) -> RegionOfInterest {
        let corners = [
            self.view_point_to_frame(rect.x, rect.y),
            self.view_point_to_frame(rect.x + rect.width, rect.y + rect.height),
        ];
        let [Some((ax, ay)), Some((bx, by))] = corners else {
            return RegionOfInterest::FULL;
        };

        RegionOfInterest {
            x: ax.min(bx),
            y: ay.min(by),
            width: (ax - bx).abs(),
            height: (ay - by).abs(),
        }
        .clamped()
    }
}

/// Apply a pinch/scroll velocity to the current zoom factor
///
/// `zoom' = clamp(zoom + atan2(velocity, 10), 1.0, max)` with the angle in
/// degrees: slow gestures zoom gradually, fast ones saturate at `max`.
pub fn compute_zoom(current: f32, velocity: f32, max: f32) -> f32 {
    let max = if max.is_finite() {
        max.max(zoom::MIN_FACTOR)
    } else {
        zoom::DEFAULT_MAX_FACTOR
    };
    let desired = current + velocity.atan2(zoom::VELOCITY_DIVIDER).to_degrees();
    if desired.is_nan() {
        return current.clamp(zoom::MIN_FACTOR, max);
    }
    desired.clamp(zoom::MIN_FACTOR, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_rotate_key_cycles_through_orientations() {
        let mut orientation = InterfaceOrientation::Unknown;
        let mut seen = Vec::new();
        for _ in 0..4 {
            orientation = orientation.rotated_clockwise();
            seen.push(orientation);
        }
        assert_eq!(
            seen,
            vec![
                InterfaceOrientation::LandscapeLeft,
                InterfaceOrientation::PortraitUpsideDown,
                InterfaceOrientation::LandscapeRight,
                InterfaceOrientation::Portrait,
            ]
        );
    }

    #[test]
    fn test_zoom_without_velocity_is_unchanged() {
        assert_eq!(compute_zoom(1.0, 0.0, 4.0), 1.0);
    }

    #[test]
    fn test_zoom_clamps_to_max() {
        assert_eq!(compute_zoom(3.0, 100.0, 4.0), 4.0);
        assert_eq!(compute_zoom(4.0, 100.0, 4.0), 4.0);
    }

    #[test]
    fn test_fast_gesture_reaches_max() {
        assert_eq!(compute_zoom(1.0, 100.0, 4.0), 4.0);
    }

    #[test]
    fn test_slow_gesture_zooms_gradually() {
        let zoomed = compute_zoom(1.0, zoom::KEY_VELOCITY, 4.0);
        assert!(approx(zoomed, 1.0 + zoom::KEY_VELOCITY.atan2(10.0).to_degrees()));
        assert!(zoomed > 1.2 && zoomed < 1.4);
    }

    #[test]
    fn test_zoom_clamps_to_min() {
        assert_eq!(compute_zoom(1.2, -100.0, 4.0), 1.0);
    }

    #[test]
    fn test_zoom_with_max_below_one() {
        assert_eq!(compute_zoom(1.0, 50.0, 0.5), 1.0);
    }

    #[test]
    fn test_orientation_mapping() {
        assert_eq!(
            VideoOrientation::from(InterfaceOrientation::Unknown),
            VideoOrientation::Portrait
        );
        assert_eq!(
            VideoOrientation::from(InterfaceOrientation::LandscapeLeft),
            VideoOrientation::LandscapeLeft
        );
        assert_eq!(
            VideoOrientation::from(InterfaceOrientation::LandscapeRight),
            VideoOrientation::LandscapeRight
        );
        assert_eq!(
            VideoOrientation::from(InterfaceOrientation::PortraitUpsideDown),
            VideoOrientation::PortraitUpsideDown
        );
    }

    #[test]
    fn test_accelerometer_orientation() {
        assert_eq!(
            InterfaceOrientation::from_accelerometer("right-up"),
            InterfaceOrientation::LandscapeRight
        );
        assert_eq!(
            InterfaceOrientation::from_accelerometer("undefined"),
            InterfaceOrientation::Unknown
        );
    }

    #[test]
    fn test_full_view_maps_to_full_frame() {
        let layer = PreviewLayer::new(Size::new(640.0, 480.0), Size::new(640.0, 480.0));
        let roi = layer.metadata_output_rect(Rect::new(0.0, 0.0, 640.0, 480.0));
        assert!(roi.is_full());
    }

    #[test]
    fn test_aspect_fill_crops_sides() {
        // 4:3 frame filling a square view: 1/8 of the frame width is cropped per side
        let layer = PreviewLayer::new(Size::new(300.0, 300.0), Size::new(400.0, 300.0));
        let video = layer.video_rect().unwrap();
        assert!(approx(video.width, 400.0));
        assert!(approx(video.x, -50.0));

        let roi = layer.metadata_output_rect(Rect::new(0.0, 0.0, 300.0, 300.0));
        assert!(approx(roi.x, 0.125));
        assert!(approx(roi.width, 0.75));
        assert!(approx(roi.y, 0.0));
        assert!(approx(roi.height, 1.0));
    }

    #[test]
    fn test_aspect_fit_letterboxes() {
        let mut layer = PreviewLayer::new(Size::new(300.0, 300.0), Size::new(400.0, 300.0));
        layer.gravity = VideoGravity::AspectFit;
        let video = layer.video_rect().unwrap();
        assert!(approx(video.height, 225.0));
        assert!(approx(video.y, 37.5));
    }

    #[test]
    fn test_rotated_rect_conversion() {
        // Top-left quarter of the display is the bottom-left quarter of the frame
        // after a 90° clockwise rotation
        let mut layer = PreviewLayer::new(Size::new(100.0, 100.0), Size::new(100.0, 100.0));
        layer.orientation = VideoOrientation::LandscapeLeft;
        let roi = layer.metadata_output_rect(Rect::new(0.0, 0.0, 50.0, 50.0));
        assert!(approx(roi.x, 0.0));
        assert!(approx(roi.y, 0.5));
        assert!(approx(roi.width, 0.5));
        assert!(approx(roi.height, 0.5));
    }

    #[test]
    fn test_zero_size_rect_is_clamped() {
        let layer = PreviewLayer::new(Size::new(640.0, 480.0), Size::new(640.0, 480.0));
        let roi = layer.metadata_output_rect(Rect::new(320.0, 240.0, 0.0, 0.0));
        assert!(roi.is_full());
    }

    #[test]
    fn test_unknown_geometry_uses_full_frame() {
        let layer = PreviewLayer::new(Size::default(), Size::new(640.0, 480.0));
        let roi = layer.metadata_output_rect(Rect::new(10.0, 10.0, 20.0, 20.0));
        assert!(roi.is_full());
    }

    #[test]
    fn test_centered_square_accounts_for_cell_aspect() {
        let rect = Rect::centered_square(Size::new(100.0, 50.0), 0.5, 2.0);
        assert!(approx(rect.width, 50.0));
        assert!(approx(rect.height, 25.0));
        assert!(approx(rect.x, 25.0));
        assert!(approx(rect.y, 12.5));
    }
}
