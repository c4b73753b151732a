//! RetinaFace detector (mobilenet-0.25 export, fixed square input).
//!
//! Outputs per prior: box offsets, `[background, face]` probabilities and
//! five landmark offsets, decoded against the SSD-style prior grid.

use std::path::Path;

use image::{imageops::FilterType, RgbImage};
use ort::session::Session;

use crate::face::detection::{non_max_suppression, BoundingBox, Detection, Point};
use crate::face::{FaceDetector, FaceError};

const MIN_SIZES: [[f32; 2]; 3] = [[16.0, 32.0], [64.0, 128.0], [256.0, 512.0]];
const STEPS: [u32; 3] = [8, 16, 32];
const VARIANCE: [f32; 2] = [0.1, 0.2];
const MEAN_BGR: [f32; 3] = [104.0, 117.0, 123.0];
const LANDMARKS: usize = 5;

/// Prior box in normalized center form.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Prior {
    cx: f32,
    cy: f32,
    w: f32,
    h: f32,
}

pub struct RetinaDetector {
    session: Session,
    input_size: u32,
    threshold: f32,
    nms_threshold: f32,
    priors: Vec<Prior>,
}

impl RetinaDetector {
    pub fn new(
        model: &Path,
        input_size: u32,
        threshold: f32,
        nms_threshold: f32,
    ) -> Result<Self, FaceError> {
        Ok(Self {
            session: super::open_session(model)?,
            input_size,
            threshold,
            nms_threshold,
            priors: priors(input_size),
        })
    }

    fn blob(&self, frame: &RgbImage) -> Vec<f32> {
        let size = self.input_size;
        let resized = image::imageops::resize(frame, size, size, FilterType::Triangle);
        let plane = (size * size) as usize;
        let mut data = vec![0.0f32; 3 * plane];
        for (x, y, pixel) in resized.enumerate_pixels() {
            let offset = (y * size + x) as usize;
            // BGR channel order
            for c in 0..3 {
                data[c * plane + offset] = pixel[2 - c] as f32 - MEAN_BGR[c];
            }
        }
        data
    }
}

impl FaceDetector for RetinaDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, FaceError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Ok(vec![]);
        }

        let size = self.input_size as i64;
        let blob = self.blob(frame);
        let outputs = super::run(&mut self.session, vec![1, 3, size, size], blob)
            .map_err(FaceError::DetectionFailed)?;

        let [loc, conf, landms] = outputs.as_slice() else {
            return Err(FaceError::DetectionFailed(format!(
                "expected 3 outputs, got {}",
                outputs.len()
            )));
        };

        let detections = decode(
            &self.priors,
            loc,
            conf,
            landms,
            self.threshold,
            width,
            height,
        )?;
        let detections = non_max_suppression(detections, self.nms_threshold);
        log::debug!("RetinaFace: {} faces", detections.len());
        Ok(detections)
    }
}

fn priors(input_size: u32) -> Vec<Prior> {
    let size = input_size as f32;
    let mut priors = Vec::new();
    for (step, min_sizes) in STEPS.iter().zip(MIN_SIZES.iter()) {
        let cells = input_size.div_ceil(*step);
        for i in 0..cells {
            for j in 0..cells {
                for min_size in min_sizes {
                    priors.push(Prior {
                        cx: (j as f32 + 0.5) * *step as f32 / size,
                        cy: (i as f32 + 0.5) * *step as f32 / size,
                        w: min_size / size,
                        h: min_size / size,
                    });
                }
            }
        }
    }
    priors
}

fn decode(
    priors: &[Prior],
    loc: &[f32],
    conf: &[f32],
    landms: &[f32],
    threshold: f32,
    width: u32,
    height: u32,
) -> Result<Vec<Detection>, FaceError> {
    let n = priors.len();
    if loc.len() != n * 4 || conf.len() != n * 2 || landms.len() != n * 2 * LANDMARKS {
        return Err(FaceError::DetectionFailed(format!(
            "output sizes {}/{}/{} do not match {} priors",
            loc.len(),
            conf.len(),
            landms.len(),
            n
        )));
    }

    let (w, h) = (width as f32, height as f32);
    let mut detections = Vec::new();

    for (i, prior) in priors.iter().enumerate() {
        let score = conf[i * 2 + 1];
        if score < threshold {
            continue;
        }

        let l = &loc[i * 4..i * 4 + 4];
        let cx = prior.cx + l[0] * VARIANCE[0] * prior.w;
        let cy = prior.cy + l[1] * VARIANCE[0] * prior.h;
        let bw = prior.w * (l[2] * VARIANCE[1]).exp();
        let bh = prior.h * (l[3] * VARIANCE[1]).exp();

        let Some(bbox) = BoundingBox::clamped(
            (cx - bw / 2.0) * w,
            (cy - bh / 2.0) * h,
            (cx + bw / 2.0) * w,
            (cy + bh / 2.0) * h,
            width,
            height,
        ) else {
            continue;
        };

        let marks = &landms[i * 2 * LANDMARKS..(i + 1) * 2 * LANDMARKS];
        let landmarks = marks
            .chunks_exact(2)
            .map(|p| {
                let px = (prior.cx + p[0] * VARIANCE[0] * prior.w) * w;
                let py = (prior.cy + p[1] * VARIANCE[0] * prior.h) * h;
                Point::new(
                    (px - bbox.x1 as f32) / bbox.width() as f32,
                    (py - bbox.y1 as f32) / bbox.height() as f32,
                )
            })
            .collect();

        detections.push(Detection::new(bbox, score).with_landmarks(landmarks));
    }

    Ok(detections)
}
