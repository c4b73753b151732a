//! Lightweight box-only face detector (Ultra-Light-Fast RFB-320 export),
//! serving the `opencv` backend. It produces no landmarks, so faces reach
//! the extractor unaligned.

use std::path::Path;

use image::{imageops::FilterType, RgbImage};
use ort::session::Session;

use crate::face::detection::{non_max_suppression, BoundingBox, Detection};
use crate::face::{FaceDetector, FaceError};

const INPUT_WIDTH: u32 = 320;
const INPUT_HEIGHT: u32 = 240;

pub struct CascadeDetector {
    session: Session,
    threshold: f32,
    nms_threshold: f32,
}

impl CascadeDetector {
    pub fn new(model: &Path, threshold: f32, nms_threshold: f32) -> Result<Self, FaceError> {
        Ok(Self {
            session: super::open_session(model)?,
            threshold,
            nms_threshold,
        })
    }
}

impl FaceDetector for CascadeDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, FaceError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Ok(vec![]);
        }

        let resized = image::imageops::resize(frame, INPUT_WIDTH, INPUT_HEIGHT, FilterType::Triangle);
        let plane = (INPUT_WIDTH * INPUT_HEIGHT) as usize;
        let mut data = vec![0.0f32; 3 * plane];
        for (x, y, pixel) in resized.enumerate_pixels() {
            let offset = (y * INPUT_WIDTH + x) as usize;
            for c in 0..3 {
                data[c * plane + offset] = (pixel[c] as f32 - 127.0) / 128.0;
            }
        }

        let outputs = super::run(
            &mut self.session,
            vec![1, 3, INPUT_HEIGHT as i64, INPUT_WIDTH as i64],
            data,
        )
        .map_err(FaceError::DetectionFailed)?;

        let [scores, boxes] = outputs.as_slice() else {
            return Err(FaceError::DetectionFailed(format!(
                "expected 2 outputs, got {}",
                outputs.len()
            )));
        };

        let detections = decode(scores, boxes, self.threshold, width, height)?;
        Ok(non_max_suppression(detections, self.nms_threshold))
    }
}

/// Decode `[background, face]` scores and normalized corner boxes.
fn decode(
    scores: &[f32],
    boxes: &[f32],
    threshold: f32,
    width: u32,
    height: u32,
) -> Result<Vec<Detection>, FaceError> {
    if scores.len() % 2 != 0 || boxes.len() != scores.len() * 2 {
        return Err(FaceError::DetectionFailed(format!(
            "output sizes {}/{} do not line up",
            scores.len(),
            boxes.len()
        )));
    }

    let (w, h) = (width as f32, height as f32);
    Ok(scores
        .chunks_exact(2)
        .zip(boxes.chunks_exact(4))
        .filter(|(score, _)| score[1] >= threshold)
        .filter_map(|(score, b)| {
            BoundingBox::clamped(b[0] * w, b[1] * h, b[2] * w, b[3] * h, width, height)
                .map(|bbox| Detection::new(bbox, score[1]))
        })
        .collect())
}
