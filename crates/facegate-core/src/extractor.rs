use crate::image_source::Frame;
use crate::template::FeatureVector;
use crate::types::FaceRegion;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("image could not be decoded: {0}")]
    Undecodable(String),
    /// The extraction backend itself failed (model, runtime). Not an outcome.
    #[error("extractor backend failed: {0}")]
    Backend(String),
}

/// Features of the one face chosen from a frame.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub features: FeatureVector,
    pub region: FaceRegion,
}

/// Locates one face in an image and summarises it as a feature vector.
///
/// Implementations must be deterministic for a fixed image and configuration,
/// and must document which face they pick when several are present.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, frame: &Frame) -> Result<Extraction, ExtractError>;
}
