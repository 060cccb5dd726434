//! [`FeatureExtractor`] backed by SCRFD + ArcFace.
//!
//! Face selection: the highest-confidence detection after NMS; equal
//! confidences resolve to the earlier anchor in scan order. The chosen face is
//! aligned on its five landmarks before embedding.

use std::path::Path;

use facegate_core::{ExtractError, Extraction, FaceRegion, FeatureExtractor, Frame};
use image::RgbImage;

use crate::alignment::align_face;
use crate::detector::{Detection, FaceDetector};
use crate::recognizer::FaceRecognizer;
use crate::{DETECTOR_MODEL_FILE, RECOGNIZER_MODEL_FILE};

pub struct OnnxExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxExtractor {
    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path, detection_threshold: f32) -> Result<Self, ExtractError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE), detection_threshold)
            .map_err(backend)?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE)).map_err(backend)?;
        Ok(Self { detector, recognizer })
    }
}

impl FeatureExtractor for OnnxExtractor {
    fn extract(&self, frame: &Frame) -> Result<Extraction, ExtractError> {
        let image = decode_frame(frame)?;
        let faces = self.detector.detect(&image).map_err(backend)?;
        tracing::debug!(faces = faces.len(), "detector finished");

        let face = faces.first().ok_or(ExtractError::NoFaceDetected)?;
        let region = face_region(face, image.width(), image.height()).ok_or(ExtractError::NoFaceDetected)?;

        let aligned = align_face(&image, &face.landmarks).ok_or(ExtractError::NoFaceDetected)?;
        let features = self.recognizer.embed(&aligned).map_err(backend)?;

        Ok(Extraction { features, region })
    }
}

fn backend(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Backend(e.to_string())
}

fn decode_frame(frame: &Frame) -> Result<RgbImage, ExtractError> {
    let decoded = image::load_from_memory(&frame.bytes).map_err(|e| ExtractError::Undecodable(e.to_string()))?;
    Ok(decoded.to_rgb8())
}

/// Clamp a detection to the frame. `None` if nothing of it lies inside.
fn face_region(face: &Detection, width: u32, height: u32) -> Option<FaceRegion> {
    let x1 = face.x.max(0.0).floor() as u32;
    let y1 = face.y.max(0.0).floor() as u32;
    let x2 = ((face.x + face.width).ceil().max(0.0) as u32).min(width);
    let y2 = ((face.y + face.height).ceil().max(0.0) as u32).min(height);
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(FaceRegion {
        x: x1,
        y: y1,
        width: x2 - x1,
        height: y2 - y1,
    })
}
