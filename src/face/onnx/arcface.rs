//! ArcFace embedding extractor.
//!
//! Expects an NCHW RGB input normalized with `(v - 127.5) / 128` and a
//! dynamic batch dimension; embeddings are L2-normalized.

use std::path::Path;

use image::RgbImage;
use ort::session::Session;

use crate::face::align::{self, Blob};
use crate::face::{Embedding, FaceError, FaceExtractor, Point};

pub struct ArcFaceExtractor {
    session: Session,
    input_size: u32,
}

impl ArcFaceExtractor {
    pub fn new(model: &Path, input_size: u32) -> Result<Self, FaceError> {
        Ok(Self {
            session: super::open_session(model)?,
            input_size,
        })
    }
}

impl FaceExtractor for ArcFaceExtractor {
    fn prepare(&self, face: &RgbImage, landmarks: &[Point]) -> Result<Blob, FaceError> {
        let size = self.input_size;
        if face.dimensions() != (size, size) {
            return Err(FaceError::ExtractionFailed(format!(
                "face is {:?}, expected {size}x{size}",
                face.dimensions()
            )));
        }
        Ok(align::to_blob(&align::align(face, landmarks, size)))
    }

    fn extract_one(&mut self, blob: &Blob) -> Result<Embedding, FaceError> {
        self.extract_batch(std::slice::from_ref(blob))?
            .pop()
            .ok_or_else(|| FaceError::ExtractionFailed("No embedding returned".to_string()))
    }

    fn extract_batch(&mut self, blobs: &[Blob]) -> Result<Vec<Embedding>, FaceError> {
        let Some(first) = blobs.first() else {
            return Ok(vec![]);
        };
        if first.is_empty() {
            return Err(FaceError::ExtractionFailed("empty blob".to_string()));
        }
        if blobs.iter().any(|b| b.len() != first.len()) {
            return Err(FaceError::ExtractionFailed(
                "blobs in one batch must share a shape".to_string(),
            ));
        }

        let shape = vec![
            blobs.len() as i64,
            first.channels as i64,
            first.height as i64,
            first.width as i64,
        ];
        let data: Vec<f32> = blobs.iter().flat_map(|b| b.data.iter().copied()).collect();

        let outputs = super::run(&mut self.session, shape, data)
            .map_err(FaceError::ExtractionFailed)?;
        let features = outputs
            .into_iter()
            .next()
            .ok_or_else(|| FaceError::ExtractionFailed("model has no outputs".to_string()))?;

        if features.is_empty() || features.len() % blobs.len() != 0 {
            return Err(FaceError::ExtractionFailed(format!(
                "{} output values for a batch of {}",
                features.len(),
                blobs.len()
            )));
        }

        let dims = features.len() / blobs.len();
        Ok(features.chunks_exact(dims).map(l2_normalized).collect())
    }
}

fn l2_normalized(v: &[f32]) -> Embedding {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalized() {
        let v = l2_normalized(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalized(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    #[ignore = "requires w600k_r50.onnx in FACEMATCH_BASE_PATH/models"]
    fn test_arcface_embedding_dimensions() {
        let config = crate::config::Config::load().unwrap();
        let mut extractor =
            ArcFaceExtractor::new(&config.model_path(&config.models.arcface), 112).unwrap();

        let face = RgbImage::from_pixel(112, 112, image::Rgb([120, 100, 90]));
        let blob = extractor.prepare(&face, &[]).unwrap();
        let batch = extractor.extract_batch(&[blob.clone(), blob]).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].len(), 512);
        assert!((batch[0].iter().map(|x| x * x).sum::<f32>().sqrt() - 1.0).abs() < 1e-3);
    }
}
