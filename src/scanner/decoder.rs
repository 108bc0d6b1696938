// SPDX-License-Identifier: GPL-3.0-only

//! Symbol decoding
//!
//! The [`MetadataDecoder`] trait is the seam between the metadata output and
//! the actual barcode library. [`QrDecoder`] implements it with `rqrr`: the
//! region of interest is cropped out of the frame, converted to grayscale and
//! downscaled before grid detection.

use super::types::{MetadataObject, RegionOfInterest, Symbology};
use crate::backends::camera::types::CameraFrame;
use crate::constants::decoder;
use tracing::{debug, trace};

/// Decodes symbols in a camera frame
pub trait MetadataDecoder: Send + Sync + 'static {
    /// Symbologies this decoder can read
    fn supported_symbologies(&self) -> &[Symbology];

    /// Find symbols inside `roi`, in the order the decoder located them
    fn decode(&self, frame: &CameraFrame, roi: &RegionOfInterest) -> Vec<MetadataObject>;
}

/// QR code decoder backed by `rqrr`
#[derive(Debug, Clone)]
pub struct QrDecoder {
    /// Maximum dimension for processing (regions are downscaled to this)
    max_dimension: u32,
}

impl Default for QrDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl QrDecoder {
    pub fn new() -> Self {
        Self {
            max_dimension: decoder::DEFAULT_MAX_DIMENSION,
        }
    }

    /// Create a decoder with custom max dimension
    pub fn with_max_dimension(max_dimension: u32) -> Self {
        Self {
            max_dimension: max_dimension.max(64),
        }
    }
}

impl MetadataDecoder for QrDecoder {
    fn supported_symbologies(&self) -> &[Symbology] {
        &[Symbology::Qr]
    }

    fn decode(&self, frame: &CameraFrame, roi: &RegionOfInterest) -> Vec<MetadataObject> {
        let start = std::time::Instant::now();

        let Some(plane) = LumaPlane::extract(frame, roi, self.max_dimension) else {
            return Vec::new();
        };

        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            plane.width as usize,
            plane.height as usize,
            |x, y| plane.data[y * plane.width as usize + x],
        );
        let grids = prepared.detect_grids();

        trace!(
            width = plane.width,
            height = plane.height,
            scale = plane.scale,
            grids = grids.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "QR grid detection complete"
        );

        let mut objects = Vec::with_capacity(grids.len());
        for grid in grids {
            let xs = grid.bounds.iter().map(|p| p.x);
            let ys = grid.bounds.iter().map(|p| p.y);
            let (min_x, max_x) = (xs.clone().min().unwrap_or(0), xs.max().unwrap_or(0));
            let (min_y, max_y) = (ys.clone().min().unwrap_or(0), ys.max().unwrap_or(0));
            let bounds = plane.to_frame_region(min_x, min_y, max_x, max_y, frame);

            match grid.decode() {
                Ok((_meta, content)) => {
                    debug!(content = %content, x = bounds.x, y = bounds.y, "Decoded QR code");
                    objects.push(MetadataObject {
                        payload: Some(content),
                        symbology: Symbology::Qr,
                        bounds,
                    });
                }
                Err(e) => {
                    debug!(error = ?e, "Located QR code could not be decoded");
                    objects.push(MetadataObject {
                        payload: None,
                        symbology: Symbology::Qr,
                        bounds,
                    });
                }
            }
        }

        objects
    }
}

/// Grayscale copy of a frame region, optionally downscaled
struct LumaPlane {
    data: Vec<u8>,
    width: u32,
    height: u32,
    /// Source pixels per plane pixel
    scale: f32,
    /// Origin of the region in the source frame
    origin_x: u32,
    origin_y: u32,
}

impl LumaPlane {
    /// Crop `roi` out of `frame` and sample it into at most `max_dimension` pixels per side
    fn extract(frame: &CameraFrame, roi: &RegionOfInterest, max_dimension: u32) -> Option<Self> {
        let (x0, y0, region_width, region_height) = roi.to_pixels(frame.width, frame.height);
        if region_width == 0 || region_height == 0 {
            return None;
        }

        let scale = (region_width as f32 / max_dimension as f32)
            .max(region_height as f32 / max_dimension as f32)
            .max(1.0);
        let width = ((region_width as f32 / scale) as u32).max(1);
        let height = ((region_height as f32 / scale) as u32).max(1);

        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            let src_y = y0 + (y as f32 * scale) as u32;
            for x in 0..width {
                let src_x = x0 + (x as f32 * scale) as u32;
                data.push(frame.luma_at(src_x, src_y));
            }
        }

        Some(Self {
            data,
            width,
            height,
            scale,
            origin_x: x0,
            origin_y: y0,
        })
    }

    /// Map a box in plane pixels back to normalized frame coordinates
    fn to_frame_region(
        &self,
        min_x: i32,
        min_y: i32,
        max_x: i32,
        max_y: i32,
        frame: &CameraFrame,
    ) -> RegionOfInterest {
        let to_src_x = |v: i32| self.origin_x as f32 + v.max(0) as f32 * self.scale;
        let to_src_y = |v: i32| self.origin_y as f32 + v.max(0) as f32 * self.scale;
        let x = to_src_x(min_x);
        let y = to_src_y(min_y);
        RegionOfInterest::from_pixels(
            x as u32,
            y as u32,
            (to_src_x(max_x) - x) as u32,
            (to_src_y(max_y) - y) as u32,
            frame.width,
            frame.height,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{FrameData, PixelFormat};
    use std::time::Instant;

    fn gray_frame(width: u32, height: u32, value: impl Fn(u32, u32) -> u8) -> CameraFrame {
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(value(x, y));
            }
        }
        CameraFrame {
            width,
            height,
            data: FrameData::from(data),
            format: PixelFormat::Gray8,
            stride: width,
            captured_at: Instant::now(),
        }
    }

    #[test]
    fn test_luma_plane_crops_region() {
        let frame = gray_frame(4, 4, |x, y| (x + 4 * y) as u8);
        let roi = RegionOfInterest::new(0.5, 0.5, 0.5, 0.5);
        let plane = LumaPlane::extract(&frame, &roi, 640).unwrap();
        assert_eq!((plane.width, plane.height), (2, 2));
        assert_eq!(plane.data, vec![10, 11, 14, 15]);
        assert_eq!((plane.origin_x, plane.origin_y), (2, 2));
    }

    #[test]
    fn test_luma_plane_downscales_large_frames() {
        let frame = gray_frame(1280, 720, |_, _| 128);
        let plane = LumaPlane::extract(&frame, &RegionOfInterest::FULL, 640).unwrap();
        assert_eq!(plane.width, 640);
        assert_eq!(plane.height, 360);
        assert!((plane.scale - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_plane_region_maps_back_to_frame() {
        let frame = gray_frame(1280, 720, |_, _| 0);
        let plane = LumaPlane::extract(&frame, &RegionOfInterest::FULL, 640).unwrap();
        let region = plane.to_frame_region(160, 90, 480, 270, &frame);
        assert!((region.x - 0.25).abs() < 1e-3);
        assert!((region.y - 0.25).abs() < 1e-3);
        assert!((region.width - 0.5).abs() < 1e-3);
        assert!((region.height - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_blank_frame_has_no_codes() {
        let frame = gray_frame(320, 240, |_, _| 255);
        let decoder = QrDecoder::new();
        assert!(decoder.decode(&frame, &RegionOfInterest::FULL).is_empty());
    }

    #[test]
    fn test_empty_frame_has_no_codes() {
        let frame = gray_frame(0, 0, |_, _| 0);
        let decoder = QrDecoder::new();
        assert!(decoder.decode(&frame, &RegionOfInterest::FULL).is_empty());
    }

    #[test]
    fn test_qr_decoder_supports_qr_only() {
        assert_eq!(QrDecoder::new().supported_symbologies(), &[Symbology::Qr]);
    }
}
