//! ArcFace face recognizer via ONNX Runtime.
//!
//! Turns a 112×112 RGB face crop into an L2-normalised 512-value embedding
//! (w600k_r50 model).

use std::path::Path;
use std::sync::Mutex;

use facegate_core::FeatureVector;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

pub const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Mutex<Session>,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Embed a face crop already resized to 112×112.
    pub fn embed(&self, crop: &RgbImage) -> Result<FeatureVector, RecognizerError> {
        if crop.dimensions() != (ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE) {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_INPUT_SIZE}x{ARCFACE_INPUT_SIZE} crop, got {:?}",
                crop.dimensions()
            )));
        }
        let input = preprocess(crop);

        let mut session = self
            .session
            .lock()
            .map_err(|_| RecognizerError::InferenceFailed("recognizer session poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(FeatureVector::new(l2_normalize(raw)))
    }
}

fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let size = ARCFACE_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}
