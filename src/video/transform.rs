use std::sync::Arc;

use image::imageops::FilterType;
use image::RgbImage;
use rayon::prelude::*;

use crate::error::{DewarpError, ProjectionError, Result};
use crate::projection::ProjectionMap;
use crate::video::types::Frame;

/// Applies a projection map to frames
///
/// Stateless apart from the shared map, so one transformer serves every
/// frame of a video.
#[derive(Debug, Clone)]
pub struct FrameTransformer {
    map: Arc<ProjectionMap>,
}

impl FrameTransformer {
    pub fn new(map: Arc<ProjectionMap>) -> Self {
        Self { map }
    }

    /// Dewarp one frame.
    ///
    /// The output has the same dimensions as the input: pixels are sampled
    /// inside the crop window and the window is scaled back up to full size.
    pub fn apply(&self, frame: &Frame) -> Result<Frame> {
        let map = self.map.as_ref();
        if frame.dimensions() != map.dimensions() {
            return Err(ProjectionError::DimensionMismatch {
                expected: map.dimensions(),
                actual: frame.dimensions(),
            }
            .into());
        }

        let window = map.output_window();
        let source = frame.as_image();
        let row_bytes = window.width as usize * 3;
        let mut data = vec![0u8; row_bytes * window.height as usize];

        data.par_chunks_mut(row_bytes)
            .enumerate()
            .for_each(|(row, pixels)| {
                let y = window.y + row as u32;
                for (col, pixel) in pixels.chunks_exact_mut(3).enumerate() {
                    if let Some(coord) = map.get(window.x + col as u32, y) {
                        pixel.copy_from_slice(&sample_bilinear(source, coord.x, coord.y));
                    }
                }
            });

        let cropped = RgbImage::from_raw(window.width, window.height, data)
            .ok_or_else(|| DewarpError::generic("dewarped buffer does not match its window"))?;

        if window.width == map.width() && window.height == map.height() {
            return Ok(Frame::new(cropped));
        }

        let restored = image::imageops::resize(
            &cropped,
            map.width(),
            map.height(),
            FilterType::Triangle,
        );
        Ok(Frame::new(restored))
    }
}

/// Bilinear sample at a fractional pixel-index position.
///
/// Positions more than half a pixel outside the image are black; neighbors
/// past the last row or column are clamped to the edge.
pub fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> [u8; 3] {
    let (width, height) = image.dimensions();
    let max_x = width as f32 - 1.0;
    let max_y = height as f32 - 1.0;

    // also rejects NaN
    if !(x >= -0.5 && y >= -0.5 && x <= max_x + 0.5 && y <= max_y + 0.5) {
        return [0, 0, 0];
    }

    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = image.get_pixel(x0, y0).0;
    let p10 = image.get_pixel(x1, y0).0;
    let p01 = image.get_pixel(x0, y1).0;
    let p11 = image.get_pixel(x1, y1).0;

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    out
}
