//! Face detection and embedding extraction.
//!
//! The recognition core only talks to the two traits defined here:
//!
//! - [`FaceDetector`]: finds faces (boxes + optional landmarks) in a frame
//! - [`FaceExtractor`]: turns a cropped face into an embedding vector
//!
//! [`FacePipeline`] glues them together with the crop / resize / landmark
//! scaling steps shared by enrollment, registration and recognition.
//! Model-backed implementations live in `onnx` (feature `onnx`).

pub mod align;
pub mod detection;
#[cfg(feature = "onnx")]
mod onnx;

use std::fmt::Display;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::images;

pub use align::Blob;
pub use detection::{BoundingBox, Detection, Point};

/// A face embedding vector.
pub type Embedding = Vec<f32>;

/// Errors raised by detectors, extractors and the pipeline around them.
#[derive(Debug, thiserror::Error)]
pub enum FaceError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Face detection failed: {0}")]
    DetectionFailed(String),

    #[error("Embedding extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Detected face at {0:?} has an empty crop")]
    EmptyCrop(BoundingBox),
}

/// Finds faces in a frame.
pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, FaceError>;
}

/// Maps a cropped face to an embedding vector.
pub trait FaceExtractor: Send {
    /// Turn a resized face crop (and its landmarks in crop pixel
    /// coordinates, possibly empty) into model input.
    fn prepare(&self, face: &RgbImage, landmarks: &[Point]) -> Result<Blob, FaceError>;

    fn extract_one(&mut self, blob: &Blob) -> Result<Embedding, FaceError>;

    /// Embeddings for `blobs`, in input order.
    fn extract_batch(&mut self, blobs: &[Blob]) -> Result<Vec<Embedding>, FaceError> {
        blobs.iter().map(|blob| self.extract_one(blob)).collect()
    }
}

/// Which detector implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DetectorBackend {
    /// RetinaFace, with five landmarks per face
    #[default]
    Retina,
    /// Lightweight cascade-style detector, boxes only
    Opencv,
}

impl Display for DetectorBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectorBackend::Retina => write!(f, "retina"),
            DetectorBackend::Opencv => write!(f, "opencv"),
        }
    }
}

/// A detected face ready for the extractor.
#[derive(Debug, Clone)]
pub struct PreparedFace {
    pub detection: Detection,
    pub blob: Blob,
}

/// Detector + extractor pair with the shared preprocessing steps.
pub struct FacePipeline {
    detector: Box<dyn FaceDetector>,
    extractor: Box<dyn FaceExtractor>,
    input_size: u32,
}

impl FacePipeline {
    pub fn new(
        detector: Box<dyn FaceDetector>,
        extractor: Box<dyn FaceExtractor>,
        input_size: u32,
    ) -> Self {
        Self {
            detector,
            extractor,
            input_size,
        }
    }

    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, FaceError> {
        self.detector.detect(frame)
    }

    /// Crop `detection` out of `frame`, resize it to the input size, scale
    /// its landmarks into the resized crop and build the model blob.
    pub fn prepare(&self, frame: &RgbImage, detection: Detection) -> Result<PreparedFace, FaceError> {
        let crop = images::crop(frame, &detection.bbox)
            .ok_or(FaceError::EmptyCrop(detection.bbox))?;
        let crop = images::resize(&crop, self.input_size);
        let landmarks = detection.landmarks_for_crop(self.input_size);
        let blob = self.extractor.prepare(&crop, &landmarks)?;

        Ok(PreparedFace { detection, blob })
    }

    pub fn extract_one(&mut self, blob: &Blob) -> Result<Embedding, FaceError> {
        self.extractor.extract_one(blob)
    }

    /// Batched extraction; the result always has one embedding per blob.
    pub fn extract_batch(&mut self, blobs: &[Blob]) -> Result<Vec<Embedding>, FaceError> {
        if blobs.is_empty() {
            return Ok(vec![]);
        }

        let embeddings = self.extractor.extract_batch(blobs)?;
        if embeddings.len() != blobs.len() {
            return Err(FaceError::ExtractionFailed(format!(
                "expected {} embeddings, got {}",
                blobs.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }
}

/// Build the model-backed pipeline selected by `config`.
#[cfg(feature = "onnx")]
pub fn load_pipeline(config: &Config) -> Result<FacePipeline, FaceError> {
    onnx::load_pipeline(config)
}

#[cfg(not(feature = "onnx"))]
pub fn load_pipeline(config: &Config) -> Result<FacePipeline, FaceError> {
    Err(FaceError::InitFailed(format!(
        "no model runtime for backend '{}': built without the `onnx` feature",
        config.backend
    )))
}
