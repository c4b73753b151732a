//! Image helpers for face crops and result annotation
//!
//! Decoding frames, cropping detections, resizing to model input and drawing
//! bounding boxes onto frames.

use std::path::Path;

use anyhow::{Context, Result};
use image::{imageops::FilterType, ImageFormat, Rgb, RgbImage};

use crate::face::BoundingBox;

/// Outline color for a freshly registered face
pub const REGISTER_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
/// Outline color for a recognized face
pub const RECOGNIZE_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

const BOX_THICKNESS: u32 = 2;

/// Decode an image file into an RGB frame
pub fn load_frame(path: &Path) -> Result<RgbImage> {
    let img = image::open(path).with_context(|| format!("Failed to decode image {path:?}"))?;
    Ok(img.to_rgb8())
}

/// Copy the region covered by `bbox` out of `frame`.
///
/// The box is clipped to the frame; returns `None` when nothing is left.
pub fn crop(frame: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let (width, height) = frame.dimensions();
    let x1 = bbox.x1.min(width);
    let y1 = bbox.y1.min(height);
    let x2 = bbox.x2.min(width);
    let y2 = bbox.y2.min(height);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    Some(image::imageops::crop_imm(frame, x1, y1, x2 - x1, y2 - y1).to_image())
}

/// Resize a face crop to a `size` x `size` square
pub fn resize(face: &RgbImage, size: u32) -> RgbImage {
    if face.dimensions() == (size, size) {
        return face.clone();
    }
    image::imageops::resize(face, size, size, FilterType::Triangle)
}

/// Draw a rectangle outline for `bbox` onto `frame`
pub fn draw_box(frame: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let x1 = bbox.x1.min(width - 1);
    let y1 = bbox.y1.min(height - 1);
    let x2 = bbox.x2.saturating_sub(1).min(width - 1);
    let y2 = bbox.y2.saturating_sub(1).min(height - 1);

    for t in 0..BOX_THICKNESS {
        for x in x1..=x2 {
            frame.put_pixel(x, (y1 + t).min(y2), color);
            frame.put_pixel(x, y2.saturating_sub(t).max(y1), color);
        }
        for y in y1..=y2 {
            frame.put_pixel((x1 + t).min(x2), y, color);
            frame.put_pixel(x2.saturating_sub(t).max(x1), y, color);
        }
    }
}

/// Encode a frame as PNG bytes
pub fn encode_png(frame: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    frame
        .write_to(&mut std::io::Cursor::new(&mut buf), ImageFormat::Png)
        .context("Failed to encode PNG")?;
    Ok(buf)
}
