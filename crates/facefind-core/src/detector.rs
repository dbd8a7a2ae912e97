//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the image into a 640x640 RGB tensor, decodes the three
//! anchor-free stride levels and applies NMS. Detections come back sorted by
//! confidence, highest first.

use crate::adapter::FaceDetector;
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("image has zero width or height")]
    EmptyImage,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Metadata for mapping letterboxed coordinates back to the input image.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Session,
    /// Per-stride output indices for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        // score + bbox per stride; exports with landmarks carry three more.
        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            stride_indices,
        })
    }

    fn run(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectorError::EmptyImage);
        }

        let (input, letterbox) = preprocess(image);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            all_detections.extend(decode_stride(
                scores,
                bboxes,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let mut result = nms(all_detections, SCRFD_NMS_THRESHOLD);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(result)
    }
}

impl FaceDetector for ScrfdDetector {
    type Error = DetectorError;

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        self.run(image)
    }
}

/// Letterbox an RGB image into a NCHW float tensor normalized for SCRFD.
fn preprocess(image: &RgbImage) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = (image.width() as f32, image.height() as f32);
    let size = SCRFD_INPUT_SIZE as f32;
    let scale = (size / width).min(size / height);

    let new_w = ((width * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let new_h = ((height * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let pad_x = (size - new_w as f32) / 2.0;
    let pad_y = (size - new_h as f32) / 2.0;

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let pad_x_start = pad_x.floor() as u32;
    let pad_y_start = pad_y.floor() as u32;

    // Padding stays at 0.0, which is SCRFD_MEAN after normalization.
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x + pad_x_start) as usize;
        let ty = (y + pad_y_start) as usize;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, LetterboxInfo { scale, pad_x, pad_y })
}

/// Discover output tensor ordering by name.
///
/// Exports that name their tensors "score_8", "bbox_16", ... are mapped by
/// name. Anything else falls back to the standard positional ordering:
///   [0-2] = scores (strides 8, 16, 32)
///   [3-5] = bboxes (strides 8, 16, 32)
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(indices) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [indices[0], indices[1], indices[2]]
        }
        None => {
            tracing::info!(
                ?names,
                "SCRFD: output names not recognized, using positional mapping [0-2]=scores, [3-5]=bboxes"
            );
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = SCRFD_INPUT_SIZE / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid) as f32 * s;
        let anchor_cy = (anchor_idx / grid) as f32 * s;

        let off = idx * 4;
        let Some(d) = bboxes.get(off..off + 4) else {
            continue;
        };
        let x1 = anchor_cx - d[0] * s;
        let y1 = anchor_cy - d[1] * s;
        let x2 = anchor_cx + d[2] * s;
        let y2 = anchor_cy + d[3] * s;

        let orig_x1 = (x1 - letterbox.pad_x) / letterbox.scale;
        let orig_y1 = (y1 - letterbox.pad_y) / letterbox.scale;
        let orig_x2 = (x2 - letterbox.pad_x) / letterbox.scale;
        let orig_y2 = (y2 - letterbox.pad_y) / letterbox.scale;

        detections.push(BoundingBox {
            x: orig_x1,
            y: orig_y1,
            width: orig_x2 - orig_x1,
            height: orig_y2 - orig_y1,
            confidence: score.clamp(0.0, 1.0),
        });
    }

    detections
}

/// Non-Maximum Suppression: remove overlapping detections.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.width * a.height + b.width * b.height - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
