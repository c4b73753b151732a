//! Face recognition service over an enrollment directory.
//!
//! Provides a high-level interface for recognition and registration:
//! - Lazily (re)builds the identity gallery whenever it is stale
//! - Matches query embeddings or whole frames against the gallery
//! - Registers new faces and persists them for the next rebuild
//! - Serializes every gallery access behind one lock

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use image::RgbImage;
use serde::Serialize;

use crate::face::{BoundingBox, FaceError, FacePipeline};
use crate::images;
use crate::storage::EnrollmentStorage;

use super::builder::{self, BuildError, BuildReport};
use super::matcher::{self, MatchResult, VerifyPolicy};
use super::registration::{self, Registration, RegistrationError};
use super::store::{EmbeddingStore, StoreError};

/// Default margin added around a registered face before it is saved
pub const DEFAULT_ENROLL_MARGIN: f32 = 0.2;

/// Errors that can occur during recognition operations.
#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Face error: {0}")]
    Face(#[from] FaceError),

    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Match for one face found in a frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceMatch {
    pub bbox: BoundingBox,
    pub detection_score: f32,
    /// Matched identity, empty when nothing matched
    pub name: String,
    /// Cosine similarity of the match
    pub score: f32,
    pub matched: bool,
}

/// Result of recognizing every face in a frame.
#[derive(Debug, Clone)]
pub struct FrameRecognition {
    pub matches: Vec<FaceMatch>,
    /// The frame with every recognized face outlined
    pub frame: RgbImage,
}

/// A registration persisted into the enrollment directory.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub registration: Registration,
    /// Saved face image, `None` when the frame had no face
    pub path: Option<PathBuf>,
}

/// Gallery entry as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentitySummary {
    pub name: String,
    pub samples: usize,
}

struct GalleryState {
    pipeline: FacePipeline,
    store: EmbeddingStore,
}

/// Recognition and registration against one enrollment directory.
///
/// The gallery starts stale and is built on first use.
pub struct RecognitionService {
    enrollment: EnrollmentStorage,
    policy: VerifyPolicy,
    enroll_margin: f32,
    state: Mutex<GalleryState>,
}

impl RecognitionService {
    /// Create a new service.
    ///
    /// # Arguments
    /// * `pipeline` - Detector and extractor to run
    /// * `enrollment` - Enrollment directory the gallery is built from
    /// * `policy` - Default verification policy
    pub fn new(pipeline: FacePipeline, enrollment: EnrollmentStorage, policy: VerifyPolicy) -> Self {
        Self {
            enrollment,
            policy,
            enroll_margin: DEFAULT_ENROLL_MARGIN,
            state: Mutex::new(GalleryState {
                pipeline,
                store: EmbeddingStore::new(),
            }),
        }
    }

    pub fn with_enroll_margin(mut self, margin: f32) -> Self {
        self.enroll_margin = margin;
        self
    }

    /// Get the configured default policy.
    pub fn policy(&self) -> VerifyPolicy {
        self.policy
    }

    pub fn enrollment(&self) -> &EnrollmentStorage {
        &self.enrollment
    }

    /// Whether the next read will rebuild the gallery.
    pub fn is_stale(&self) -> bool {
        self.lock().map(|state| !state.store.is_valid()).unwrap_or(true)
    }

    /// Flag the gallery as out of date, e.g. after editing the enrollment
    /// directory by hand.
    pub fn invalidate(&self) -> Result<(), RecognitionError> {
        self.lock()?.store.mark_stale();
        Ok(())
    }

    /// Rebuild the gallery if it is stale.
    ///
    /// Returns the build report, or `None` when the gallery was current.
    pub fn ensure_built(&self) -> Result<Option<BuildReport>, RecognitionError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        Ok(builder::rebuild(&mut state.pipeline, &mut state.store, &self.enrollment)?)
    }

    /// Match a query embedding against the gallery.
    ///
    /// Uses the service's default policy when `policy` is `None`.
    pub fn recognize(
        &self,
        query: &[f32],
        policy: Option<VerifyPolicy>,
    ) -> Result<MatchResult, RecognitionError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        builder::rebuild(&mut state.pipeline, &mut state.store, &self.enrollment)?;

        Ok(matcher::recognize(
            &state.store,
            query,
            policy.unwrap_or(self.policy),
        )?)
    }

    /// Detect every face in `frame` and match each against the gallery.
    ///
    /// Faces that cannot be prepared are logged and skipped. A frame without
    /// faces yields no matches and an untouched frame.
    pub fn recognize_frame(
        &self,
        frame: &RgbImage,
        policy: Option<VerifyPolicy>,
    ) -> Result<FrameRecognition, RecognitionError> {
        let policy = policy.unwrap_or(self.policy);

        let mut guard = self.lock()?;
        let state = &mut *guard;
        builder::rebuild(&mut state.pipeline, &mut state.store, &self.enrollment)?;

        let detections = state.pipeline.detect(frame)?;
        let mut annotated = frame.clone();
        let mut matches = Vec::with_capacity(detections.len());

        for detection in detections {
            let prepared = match state.pipeline.prepare(frame, detection) {
                Ok(prepared) => prepared,
                Err(e) => {
                    log::warn!("Skipping face: {e}");
                    continue;
                }
            };

            let embedding = state.pipeline.extract_one(&prepared.blob)?;
            let result = matcher::recognize(&state.store, &embedding, policy)?;
            log::debug!(
                "Face at {:?}: '{}' ({:.4})",
                prepared.detection.bbox,
                result.name,
                result.score
            );

            images::draw_box(&mut annotated, &prepared.detection.bbox, images::RECOGNIZE_COLOR);
            matches.push(FaceMatch {
                bbox: prepared.detection.bbox,
                detection_score: prepared.detection.score,
                matched: result.is_match(),
                name: result.name,
                score: result.score,
            });
        }

        Ok(FrameRecognition {
            matches,
            frame: annotated,
        })
    }

    /// Register the single face in `frame` and mark the gallery stale.
    pub fn register(&self, frame: &RgbImage) -> Result<Registration, RecognitionError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        Ok(registration::register_from_frame(
            &mut state.pipeline,
            &mut state.store,
            frame,
            self.enroll_margin,
        )?)
    }

    /// Register the face in `frame` and save it under `identity`, so the
    /// next rebuild picks it up.
    pub fn enroll(&self, identity: &str, frame: &RgbImage) -> Result<Enrollment, RecognitionError> {
        let registration = self.register(frame)?;

        let path = match &registration.face {
            Some(face) if registration.is_registered() => Some(
                self.enrollment
                    .save_face(identity, face)
                    .map_err(|e| RecognitionError::Storage(format!("{e:#}")))?,
            ),
            _ => None,
        };

        if let Some(path) = &path {
            log::info!("Saved enrollment face for '{identity}' to {path:?}");
        }

        Ok(Enrollment { registration, path })
    }

    /// Identities in the gallery, rebuilding it first if needed.
    pub fn identities(&self) -> Result<Vec<IdentitySummary>, RecognitionError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        builder::rebuild(&mut state.pipeline, &mut state.store, &self.enrollment)?;

        Ok(state
            .store
            .identities()
            .iter()
            .map(|identity| IdentitySummary {
                name: identity.name().to_string(),
                samples: identity.samples().len(),
            })
            .collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, GalleryState>, RecognitionError> {
        self.state
            .lock()
            .map_err(|e| RecognitionError::Internal(format!("Lock poisoned: {}", e)))
    }
}
