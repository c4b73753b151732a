//! Capturing a new enrollment face from a live frame.

use image::RgbImage;

use crate::face::{Detection, Embedding, FaceError, FacePipeline};
use crate::images;

use super::store::EmbeddingStore;

/// Outcome of a registration attempt.
#[derive(Debug, Clone)]
pub struct Registration {
    /// Embedding of the registered face, `None` when the frame had no face
    pub embedding: Option<Embedding>,
    /// The frame with the registered face outlined, or an untouched copy
    pub frame: RgbImage,
    /// The face region (plus margin) to persist under the identity folder
    pub face: Option<RgbImage>,
    pub detection: Option<Detection>,
}

impl Registration {
    pub fn is_registered(&self) -> bool {
        self.embedding.is_some()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("More than one face detected ({faces}), registration needs exactly one")]
    AmbiguousEnrollment { faces: usize },

    #[error(transparent)]
    Face(#[from] FaceError),
}

/// Register the single face in `frame`.
///
/// A frame with several faces is rejected with
/// [`RegistrationError::AmbiguousEnrollment`]; a frame without faces
/// registers nothing. Only a successful registration marks `store` stale.
/// The store's samples are never touched here: the next read rebuilds the
/// gallery from disk once the caller has persisted [`Registration::face`].
pub fn register_from_frame(
    pipeline: &mut FacePipeline,
    store: &mut EmbeddingStore,
    frame: &RgbImage,
    margin: f32,
) -> Result<Registration, RegistrationError> {
    let mut detections = pipeline.detect(frame)?;

    if detections.len() > 1 {
        log::warn!("More than one face detected ({}), registration denied", detections.len());
        return Err(RegistrationError::AmbiguousEnrollment {
            faces: detections.len(),
        });
    }

    let Some(detection) = detections.pop() else {
        log::info!("No face detected, nothing to register");
        return Ok(Registration {
            embedding: None,
            frame: frame.clone(),
            face: None,
            detection: None,
        });
    };

    let prepared = pipeline.prepare(frame, detection)?;
    let embedding = pipeline.extract_one(&prepared.blob)?;

    let (width, height) = frame.dimensions();
    let bbox = prepared.detection.bbox;
    let face = images::crop(frame, &bbox.expand(margin, width, height));

    let mut annotated = frame.clone();
    images::draw_box(&mut annotated, &bbox, images::REGISTER_COLOR);

    store.mark_stale();
    log::info!(
        "Registered face at {:?} (score {:.3}), gallery marked stale",
        bbox,
        prepared.detection.score
    );

    Ok(Registration {
        embedding: Some(embedding),
        frame: annotated,
        face,
        detection: Some(prepared.detection),
    })
}
