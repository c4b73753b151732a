//! ONNX Runtime backed detectors and extractor.

mod arcface;
mod cascade;
mod retina;

use std::path::Path;

use ort::session::Session;
use ort::value::Tensor;

use crate::config::Config;

use super::{DetectorBackend, FaceDetector, FaceError, FacePipeline};

pub use arcface::ArcFaceExtractor;
pub use cascade::CascadeDetector;
pub use retina::RetinaDetector;

pub(super) fn load_pipeline(config: &Config) -> Result<FacePipeline, FaceError> {
    let models = &config.models;

    let detector: Box<dyn FaceDetector> = match config.backend {
        DetectorBackend::Retina => Box::new(RetinaDetector::new(
            &config.model_path(&models.retina),
            models.detector_input_size,
            models.retina_threshold,
            models.nms_threshold,
        )?),
        DetectorBackend::Opencv => Box::new(CascadeDetector::new(
            &config.model_path(&models.cascade),
            models.cascade_threshold,
            models.nms_threshold,
        )?),
    };

    let extractor = ArcFaceExtractor::new(&config.model_path(&models.arcface), config.input_size)?;

    log::info!(
        "Loaded face models: backend={} detector+arcface from {:?}",
        config.backend,
        config.models_dir()
    );

    Ok(FacePipeline::new(detector, Box::new(extractor), config.input_size))
}

fn open_session(path: &Path) -> Result<Session, FaceError> {
    if !path.exists() {
        return Err(FaceError::InitFailed(format!("model file {path:?} not found")));
    }

    Session::builder()
        .and_then(|builder| builder.commit_from_file(path))
        .map_err(|e| FaceError::InitFailed(format!("failed to load {path:?}: {e}")))
}

/// Run `session` on a single f32 input tensor and copy out every output in
/// the model's declared output order.
fn run(session: &mut Session, shape: Vec<i64>, data: Vec<f32>) -> Result<Vec<Vec<f32>>, String> {
    let input_name = session
        .inputs
        .first()
        .map(|input| input.name.clone())
        .ok_or_else(|| "model has no inputs".to_string())?;
    let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();

    let input = Tensor::from_array((shape, data)).map_err(|e| e.to_string())?;
    let outputs = session
        .run(ort::inputs![input_name => input])
        .map_err(|e| e.to_string())?;

    output_names
        .iter()
        .map(|name| {
            let value = outputs
                .get(name.as_str())
                .ok_or_else(|| format!("missing output '{name}'"))?;
            let (_, data) = value
                .try_extract_tensor::<f32>()
                .map_err(|e| format!("output '{name}': {e}"))?;
            Ok(data.to_vec())
        })
        .collect()
}
