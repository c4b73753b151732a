//! Rebuilds the embedding store from the enrollment directory.
//!
//! Every image of every identity folder is run through the detector; each
//! detected face is cropped and prepared, and all faces of one identity go
//! through the extractor in a single batch. Bad images, empty crops and
//! failed extractions are logged and skipped. Only an unreadable enrollment
//! root aborts the rebuild.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::face::{Blob, FacePipeline};
use crate::images;
use crate::storage::EnrollmentStorage;

use super::store::EmbeddingStore;

/// Summary of one rebuild.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildReport {
    /// Identities present in the store afterwards
    pub identities: usize,
    /// Sample vectors stored
    pub samples: usize,
    /// Images that could not be decoded or contained no face
    pub skipped_images: usize,
    /// Detections dropped for empty crops or rejected vectors
    pub skipped_faces: usize,
    /// Identity folders that produced no vectors at all
    pub empty_identities: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Cannot read enrollment root {path:?}: {source}")]
    EnrollmentRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Repopulate `store` from `enrollment` if it is stale.
///
/// Returns `Ok(None)` without touching the detector or extractor when the
/// store is already valid.
pub fn rebuild(
    pipeline: &mut FacePipeline,
    store: &mut EmbeddingStore,
    enrollment: &EnrollmentStorage,
) -> Result<Option<BuildReport>, BuildError> {
    if store.is_valid() {
        return Ok(None);
    }

    let _span = tracing::info_span!("rebuild", root = %enrollment.root.display()).entered();

    let mut report = BuildReport::default();
    store.rebuild_if_stale(|store| {
        let identities = enrollment
            .identities()
            .map_err(|source| BuildError::EnrollmentRoot {
                path: enrollment.root.clone(),
                source,
            })?;

        for name in identities {
            build_identity(pipeline, store, enrollment, &name, &mut report);
        }
        Ok(())
    })?;

    report.identities = store.len();
    report.samples = store.sample_count();
    log::info!(
        "Built gallery: {} identities, {} samples ({} images skipped, {} faces skipped)",
        report.identities,
        report.samples,
        report.skipped_images,
        report.skipped_faces
    );

    Ok(Some(report))
}

fn build_identity(
    pipeline: &mut FacePipeline,
    store: &mut EmbeddingStore,
    enrollment: &EnrollmentStorage,
    name: &str,
    report: &mut BuildReport,
) {
    log::info!("Reading identity folder '{name}'");

    let paths = match enrollment.images(name) {
        Ok(paths) => paths,
        Err(e) => {
            log::warn!("Skipping identity '{name}': cannot list images: {e}");
            report.empty_identities.push(name.to_string());
            return;
        }
    };

    let mut blobs = Vec::new();
    for path in &paths {
        blobs.extend(prepare_image(pipeline, path, report));
    }

    if blobs.is_empty() {
        log::warn!("No usable faces for identity '{name}', leaving it out");
        report.empty_identities.push(name.to_string());
        return;
    }

    let embeddings = match pipeline.extract_batch(&blobs) {
        Ok(embeddings) => embeddings,
        Err(e) => {
            log::warn!("Feature extraction failed for identity '{name}': {e}");
            report.skipped_faces += blobs.len();
            report.empty_identities.push(name.to_string());
            return;
        }
    };

    for embedding in embeddings {
        if let Err(e) = store.add_sample(name, embedding) {
            log::warn!("Rejected vector for identity '{name}': {e}");
            report.skipped_faces += 1;
        }
    }

    match store.get(name) {
        Some(identity) => log::debug!(
            "Identity '{name}': {} samples from {} images",
            identity.samples().len(),
            paths.len()
        ),
        None => report.empty_identities.push(name.to_string()),
    }
}

/// Blobs for every usable face in one enrollment image, including every
/// face of a multi-face image.
fn prepare_image(pipeline: &mut FacePipeline, path: &Path, report: &mut BuildReport) -> Vec<Blob> {
    let frame = match images::load_frame(path) {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!("Skipping unreadable image {path:?}: {e:#}");
            report.skipped_images += 1;
            return vec![];
        }
    };

    let detections = match pipeline.detect(&frame) {
        Ok(detections) => detections,
        Err(e) => {
            log::warn!("Skipping image {path:?}: {e}");
            report.skipped_images += 1;
            return vec![];
        }
    };

    if detections.is_empty() {
        log::warn!("No face detected in {path:?}");
        report.skipped_images += 1;
        return vec![];
    }

    let mut blobs = Vec::with_capacity(detections.len());
    for detection in detections {
        match pipeline.prepare(&frame, detection) {
            Ok(face) => blobs.push(face.blob),
            Err(e) => {
                log::debug!("Skipping face in {path:?}: {e}");
                report.skipped_faces += 1;
            }
        }
    }
    blobs
}
