//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the frame to 640×640, decodes boxes and five keypoints for the
//! three anchor strides and applies NMS. Results are ordered by confidence, ties kept in scan order
//! (stride 8 before 16 before 32, row-major anchors within a stride).

use std::path::Path;
use std::sync::Mutex;

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const SCRFD_KEYPOINTS: usize = 5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A detected face in source-frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Left eye, right eye, nose, left and right mouth corner.
    pub landmarks: [(f32, f32); SCRFD_KEYPOINTS],
}

/// Scale and padding applied by the letterbox, for mapping back to the frame.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    new_w: usize,
    new_h: usize,
    pad_x: usize,
    pad_y: usize,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let size = SCRFD_INPUT_SIZE as f32;
        let scale = (size / width as f32).min(size / height as f32);
        let new_w = ((width as f32 * scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
        Self {
            scale,
            new_w,
            new_h,
            pad_x: (SCRFD_INPUT_SIZE - new_w) / 2,
            pad_y: (SCRFD_INPUT_SIZE - new_h) / 2,
        }
    }

    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Output tensor indices (score, bbox, kps) for one stride.
type StrideOutputs = (usize, usize, usize);

pub struct FaceDetector {
    session: Mutex<Session>,
    stride_outputs: [StrideOutputs; 3],
    score_threshold: f32,
}

impl FaceDetector {
    pub fn load(model_path: &Path, score_threshold: f32) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs score, bbox and kps outputs for 3 strides, got {} outputs",
                output_names.len()
            )));
        }
        let stride_outputs = map_outputs(&output_names);

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            ?stride_outputs,
            "loaded SCRFD model"
        );

        Ok(Self {
            session: Mutex::new(session),
            stride_outputs,
            score_threshold,
        })
    }

    /// Detect faces, best first.
    pub fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let (input, letterbox) = preprocess(image);

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectorError::InferenceFailed("detector session poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_outputs[pos];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;
            candidates.extend(decode_stride(
                StrideTensors { scores, bboxes, kps },
                stride,
                &letterbox,
                self.score_threshold,
            ));
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

/// Map each stride to its (score, bbox, kps) outputs: by name (`score_8`,
/// `bbox_8`, `kps_8`, ...) when the export names them, otherwise the standard
/// positional layout.
fn map_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| names.iter().position(|n| *n == format!("{prefix}_{stride}"));

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named {
        Some(v) => [v[0], v[1], v[2]],
        None => [(0, 3, 6), (1, 4, 7), (2, 5, 8)],
    }
}

/// Letterbox an RGB image into a normalised 1×3×640×640 tensor.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height());
    let resized = imageops::resize(
        image,
        letterbox.new_w as u32,
        letterbox.new_h as u32,
        FilterType::Triangle,
    );

    // Padding stays 0.0, which is the normalised mean.
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x as usize + letterbox.pad_x, y as usize + letterbox.pad_y);
        if tx >= SCRFD_INPUT_SIZE || ty >= SCRFD_INPUT_SIZE {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

/// Raw outputs of one stride: 1 score, 4 box distances and 10 keypoint offsets per anchor.
struct StrideTensors<'a> {
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

fn decode_stride(tensors: StrideTensors<'_>, stride: usize, letterbox: &Letterbox, threshold: f32) -> Vec<Detection> {
    let StrideTensors { scores, bboxes, kps } = tensors;
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let mut out = Vec::new();
    for idx in 0..anchors.min(scores.len()) {
        let score = scores[idx];
        if score <= threshold {
            continue;
        }
        let Some(d) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let Some(k) = kps.get(idx * 2 * SCRFD_KEYPOINTS..(idx + 1) * 2 * SCRFD_KEYPOINTS) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let cx = (cell % grid_w) as f32 * s;
        let cy = (cell / grid_w) as f32 * s;

        let (x1, y1) = letterbox.unmap(cx - d[0] * s, cy - d[1] * s);
        let (x2, y2) = letterbox.unmap(cx + d[2] * s, cy + d[3] * s);
        let mut landmarks = [(0.0, 0.0); SCRFD_KEYPOINTS];
        for (j, point) in landmarks.iter_mut().enumerate() {
            *point = letterbox.unmap(cx + k[2 * j] * s, cy + k[2 * j + 1] * s);
        }
        out.push(Detection {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }
    out
}

/// Non-maximum suppression. The stable sort keeps equal-confidence boxes in input order.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &Detection, b: &Detection) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> Detection {
        Detection { x, y, width: w, height: h, confidence, landmarks: [(0.0, 0.0); SCRFD_KEYPOINTS] }
    }

    #[test]
    fn test_iou_partial() {
        let a = det(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = det(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert!(iou(&a, &det(20.0, 20.0, 5.0, 5.0, 1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlap_and_orders_by_confidence() {
        let kept = nms(
            vec![
                det(200.0, 200.0, 50.0, 50.0, 0.7),
                det(0.0, 0.0, 100.0, 100.0, 0.9),
                det(5.0, 5.0, 100.0, 100.0, 0.8),
            ],
            0.4,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn test_nms_ties_keep_scan_order() {
        let kept = nms(
            vec![det(300.0, 0.0, 20.0, 20.0, 0.8), det(0.0, 0.0, 20.0, 20.0, 0.8)],
            0.4,
        );
        assert_eq!(kept[0].x, 300.0);
        assert_eq!(kept[1].x, 0.0);
    }

    #[test]
    fn test_letterbox_landscape() {
        let lb = Letterbox::fit(320, 240);
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0);
        assert_eq!(lb.pad_y, 80);
        let (x, y) = lb.unmap(100.0 * 2.0, 50.0 * 2.0 + 80.0);
        assert!((x - 100.0).abs() < 1e-4 && (y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        let image = RgbImage::from_pixel(320, 240, image::Rgb([255, 0, 128]));
        let (tensor, lb) = preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE]);
        // Padding rows normalise to zero.
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        // Inside the image: red channel saturated.
        let inside = tensor[[0, 0, lb.pad_y + 10, 10]];
        assert!((inside - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() <= 1.0 / SCRFD_STD + 1e-3);
    }

    #[test]
    fn test_decode_stride_maps_to_frame() {
        let lb = Letterbox { scale: 1.0, new_w: 640, new_h: 640, pad_x: 0, pad_y: 0 };
        let stride = 32;
        let anchors = (SCRFD_INPUT_SIZE / stride).pow(2) * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0; anchors];
        let mut bboxes = vec![0.0; anchors * 4];
        let mut kps = vec![0.0; anchors * 10];
        // Anchor in cell (x=2, y=1): centre (64, 32)
        let idx = (SCRFD_INPUT_SIZE / stride + 2) * SCRFD_ANCHORS_PER_CELL;
        scores[idx] = 0.95;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 0.5, 1.0, 1.5]);
        kps[idx * 10..idx * 10 + 10].copy_from_slice(&[-0.5, 0.0, 0.5, 0.0, 0.0, 0.25, -0.25, 0.5, 0.25, 0.5]);

        let dets = decode_stride(StrideTensors { scores: &scores, bboxes: &bboxes, kps: &kps }, stride, &lb, 0.5);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!((d.x, d.y, d.width, d.height), (32.0, 16.0, 64.0, 64.0));
        assert_eq!(
            d.landmarks,
            [(48.0, 32.0), (80.0, 32.0), (64.0, 40.0), (56.0, 48.0), (72.0, 48.0)]
        );
    }

    #[test]
    fn test_decode_stride_unmaps_landmarks_through_letterbox() {
        let lb = Letterbox::fit(320, 240);
        let stride = 32;
        let anchors = (SCRFD_INPUT_SIZE / stride).pow(2) * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0; anchors];
        let bboxes = vec![0.0; anchors * 4];
        let mut kps = vec![0.0; anchors * 10];
        // Cell (x=4, y=5): centre (128, 160) in letterbox space
        let idx = (5 * SCRFD_INPUT_SIZE / stride + 4) * SCRFD_ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        kps[idx * 10..idx * 10 + 2].copy_from_slice(&[1.0, 0.0]);

        let dets = decode_stride(StrideTensors { scores: &scores, bboxes: &bboxes, kps: &kps }, stride, &lb, 0.5);
        // (160, 160) in letterbox space → ((160 - 0) / 2, (160 - 80) / 2)
        let (x, y) = dets[0].landmarks[0];
        assert!((x - 80.0).abs() < 1e-4 && (y - 40.0).abs() < 1e-4);
        let (x, y) = dets[0].landmarks[4];
        assert!((x - 64.0).abs() < 1e-4 && (y - 40.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_stride_skips_truncated_kps() {
        let lb = Letterbox { scale: 1.0, new_w: 640, new_h: 640, pad_x: 0, pad_y: 0 };
        let scores = vec![0.9; 4];
        let bboxes = vec![1.0; 16];
        let kps = vec![0.0; 25];
        let dets = decode_stride(StrideTensors { scores: &scores, bboxes: &bboxes, kps: &kps }, 32, &lb, 0.5);
        assert_eq!(dets.len(), 2);
    }

    #[test]
    fn test_map_outputs_named_and_positional() {
        let named: Vec<String> = [
            "bbox_8", "score_8", "kps_8", "bbox_16", "score_16", "kps_16", "bbox_32", "score_32", "kps_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(map_outputs(&named), [(1, 0, 2), (4, 3, 5), (7, 6, 8)]);

        let generic: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(map_outputs(&generic), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_load_missing_model() {
        let err = FaceDetector::load(Path::new("/nonexistent/det_10g.onnx"), 0.5).err().unwrap();
        assert!(matches!(err, DetectorError::ModelNotFound(_)));
    }
}
