//! facegate-vision — ONNX-backed feature extractor.
//!
//! SCRFD finds faces and their landmarks. The chosen face is aligned to the
//! ArcFace layout and embedded into 512 values. Both models run on CPU through
//! ONNX Runtime.

pub mod alignment;
pub mod detector;
pub mod extractor;
pub mod recognizer;

pub use detector::{Detection, FaceDetector};
pub use extractor::OnnxExtractor;
pub use recognizer::FaceRecognizer;

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";
