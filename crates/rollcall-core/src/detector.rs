//! SCRFD face locator via ONNX Runtime.
//!
//! Implements the SCRFD (Sample and Computation Redistribution for Efficient Face
//! Detection) model with 3-stride anchor-free decoding and NMS post-processing.

use crate::frame::Frame;
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Finds faces in a frame.
///
/// Implementations may keep per-call scratch state, hence `&mut self`.
pub trait FaceLocator: Send {
    /// Bounding boxes in frame pixel space; empty when no face is present.
    fn locate(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Scale and offsets mapping letterboxed model space back to the frame.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride.
#[derive(Debug, Clone, Copy, PartialEq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// Raw tensors for one stride, borrowed from the session outputs.
struct StrideTensors<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// SCRFD-based face locator.
pub struct ScrfdLocator {
    session: Session,
    /// Tensor indices for strides [8, 16, 32], discovered by name at load
    /// time with a positional fallback.
    strides: [StrideOutputs; 3],
}

impl ScrfdLocator {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let strides = discover_output_indices(&output_names);
        tracing::debug!(?strides, "SCRFD output tensor mapping");

        Ok(Self { session, strides })
    }

    /// Letterbox an RGB frame into the 640x640 NCHW input tensor.
    fn preprocess(frame: &Frame) -> Result<(Array4<f32>, Letterbox), DetectorError> {
        let image = frame
            .to_image()
            .ok_or_else(|| DetectorError::InferenceFailed("frame buffer has inconsistent size".into()))?;

        let size = SCRFD_INPUT_SIZE as f32;
        let scale = (size / frame.width as f32).min(size / frame.height as f32);
        let new_w = ((frame.width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
        let new_h = ((frame.height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
        let pad_x = (SCRFD_INPUT_SIZE as u32 - new_w) / 2;
        let pad_y = (SCRFD_INPUT_SIZE as u32 - new_h) / 2;

        let resized = imageops::resize(&image, new_w, new_h, FilterType::Triangle);

        // Padding is left at zero, which is what SCRFD_MEAN normalises to.
        let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
        for (x, y, px) in resized.enumerate_pixels() {
            let (tx, ty) = ((x + pad_x) as usize, (y + pad_y) as usize);
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (px.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
            }
        }

        let letterbox = Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        };
        Ok((tensor, letterbox))
    }
}

impl FaceLocator for ScrfdLocator {
    fn locate(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }

        let (input, letterbox) = Self::preprocess(frame)?;
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in self.strides.iter().zip(SCRFD_STRIDES.iter()) {
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let tensors = StrideTensors {
                stride,
                scores: extract(slot.score, "scores")?,
                bboxes: extract(slot.bbox, "bboxes")?,
                kps: extract(slot.kps, "kps")?,
            };
            candidates.extend(decode_stride(&tensors, &letterbox, SCRFD_CONFIDENCE_THRESHOLD));
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

/// Map output tensors to strides.
///
/// Named exports ("score_8", "bbox_16", "kps_32", …) are matched by name;
/// otherwise the standard positional order applies:
///   [0-2] = scores, [3-5] = bboxes, [6-8] = kps (strides 8, 16, 32).
fn discover_output_indices(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| {
            Some(StrideOutputs {
                score: find("score", stride)?,
                bbox: find("bbox", stride)?,
                kps: find("kps", stride)?,
            })
        })
        .collect();

    match named {
        Some(slots) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [slots[0], slots[1], slots[2]]
        }
        None => {
            tracing::info!(
                ?names,
                "SCRFD: output names not recognized, using positional mapping"
            );
            std::array::from_fn(|i| StrideOutputs {
                score: i,
                bbox: i + 3,
                kps: i + 6,
            })
        }
    }
}

/// Decode detections for a single stride level.
fn decode_stride(t: &StrideTensors<'_>, letterbox: &Letterbox, threshold: f32) -> Vec<BoundingBox> {
    let grid_w = SCRFD_INPUT_SIZE / t.stride;
    let grid_h = SCRFD_INPUT_SIZE / t.stride;
    let stride = t.stride as f32;
    let num_anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;

    let mut detections = Vec::new();
    for idx in 0..num_anchors.min(t.scores.len()) {
        let score = t.scores[idx];
        if score <= threshold {
            continue;
        }

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid_w) as f32 * stride;
        let anchor_y = (cell / grid_w) as f32 * stride;

        // Distances from the anchor to the box edges, in stride units.
        let Some(d) = t.bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let (x1, y1) = letterbox.to_frame(anchor_x - d[0] * stride, anchor_y - d[1] * stride);
        let (x2, y2) = letterbox.to_frame(anchor_x + d[2] * stride, anchor_y + d[3] * stride);

        let landmarks = t.kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| {
                letterbox.to_frame(anchor_x + k[i * 2] * stride, anchor_y + k[i * 2 + 1] * stride)
            })
        });

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-Maximum Suppression; returns survivors sorted by confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-Union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
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

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            confidence: conf,
            ..BoundingBox::new(x, y, w, h)
        }
    }

    const IDENTITY_LETTERBOX: Letterbox = Letterbox {
        scale: 1.0,
        pad_x: 0.0,
        pad_y: 0.0,
    };

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        // 50 / (100 + 100 - 50)
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let result = nms(
            vec![
                make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
                make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
                make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            0.4,
        );
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(Vec::new(), 0.4).is_empty());
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        // Stride 32 grid is 20x20; anchor index 2 = cell 1 → (32, 0).
        let mut scores = vec![0.0f32; 800];
        scores[2] = 0.9;
        let mut bboxes = vec![0.0f32; 800 * 4];
        bboxes[8..12].copy_from_slice(&[0.5, 0.0, 1.0, 2.0]);
        let mut kps = vec![0.0f32; 800 * 10];
        kps[20] = 0.25;

        let tensors = StrideTensors {
            stride: 32,
            scores: &scores,
            bboxes: &bboxes,
            kps: &kps,
        };
        let dets = decode_stride(&tensors, &IDENTITY_LETTERBOX, 0.5);

        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert!((d.x - 16.0).abs() < 1e-4);
        assert!(d.y.abs() < 1e-4);
        assert!((d.width - 48.0).abs() < 1e-4);
        assert!((d.height - 64.0).abs() < 1e-4);
        let lms = d.landmarks.unwrap();
        assert!((lms[0].0 - 40.0).abs() < 1e-4);
        assert!(lms[0].1.abs() < 1e-4);
    }

    #[test]
    fn test_decode_stride_applies_letterbox() {
        let mut scores = vec![0.0f32; 800];
        scores[0] = 0.8;
        let mut bboxes = vec![0.0f32; 800 * 4];
        bboxes[0..4].copy_from_slice(&[0.0, 0.0, 1.0, 1.0]);
        let letterbox = Letterbox {
            scale: 2.0,
            pad_x: 0.0,
            pad_y: 80.0,
        };
        let tensors = StrideTensors {
            stride: 32,
            scores: &scores,
            bboxes: &bboxes,
            kps: &[],
        };
        let dets = decode_stride(&tensors, &letterbox, 0.5);

        assert_eq!(dets.len(), 1);
        assert!((dets[0].y + 40.0).abs() < 1e-4);
        assert!((dets[0].width - 16.0).abs() < 1e-4);
        assert!(dets[0].landmarks.is_none());
    }

    #[test]
    fn test_decode_stride_below_threshold() {
        let scores = vec![0.5f32; 800];
        let tensors = StrideTensors {
            stride: 32,
            scores: &scores,
            bboxes: &vec![0.0; 3200],
            kps: &[],
        };
        assert!(decode_stride(&tensors, &IDENTITY_LETTERBOX, 0.5).is_empty());
    }

    #[test]
    fn test_output_mapping_by_name() {
        let names: Vec<String> = [
            "kps_8", "kps_16", "kps_32", "score_8", "score_16", "score_32", "bbox_8", "bbox_16", "bbox_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let slots = discover_output_indices(&names);
        assert_eq!(slots[0], StrideOutputs { score: 3, bbox: 6, kps: 0 });
        assert_eq!(slots[2], StrideOutputs { score: 5, bbox: 8, kps: 2 });
    }

    #[test]
    fn test_output_mapping_positional_fallback() {
        let names: Vec<String> = (428..437).map(|n| n.to_string()).collect();
        let slots = discover_output_indices(&names);
        assert_eq!(slots[1], StrideOutputs { score: 1, bbox: 4, kps: 7 });
    }

    #[test]
    fn test_preprocess_letterboxes_wide_frame() {
        let frame = Frame::filled(640, 320, [255, 255, 255], 0);
        let (tensor, letterbox) = ScrfdLocator::preprocess(&frame).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((letterbox.scale - 1.0).abs() < 1e-6);
        assert!((letterbox.pad_y - 160.0).abs() < 1e-6);
        // Padding rows normalise to zero, image rows to (255 - 127.5) / 128.
        assert_eq!(tensor[[0, 0, 10, 10]], 0.0);
        assert!((tensor[[0, 0, 320, 10]] - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-3);
    }
}
