//! Face-mask classifier via ONNX Runtime.
//!
//! Expects a MobileNetV2-style binary classifier exported to ONNX: NHWC
//! 224x224 RGB input scaled to [0, 1], first output element = probability
//! that the face wears a mask.

use crate::frame::Frame;
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const MASK_INPUT_SIZE: u32 = 224;

/// Score above which a face counts as masked. Far stricter than the
/// classifier's own 0.5 cutoff to keep false positives rare.
pub const DEFAULT_MASK_THRESHOLD: f32 = 0.99;

#[derive(Error, Debug)]
pub enum MaskError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scores how likely a cropped face is to be wearing a mask.
pub trait MaskClassifier: Send {
    fn classify(&mut self, face: &Frame) -> Result<f32, MaskError>;
}

pub struct OnnxMaskClassifier {
    session: Session,
}

impl OnnxMaskClassifier {
    pub fn load(model_path: &Path) -> Result<Self, MaskError> {
        if !model_path.exists() {
            return Err(MaskError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            "loaded mask classifier"
        );

        Ok(Self { session })
    }

    fn preprocess(face: &Frame) -> Result<Array4<f32>, MaskError> {
        let image = face
            .to_image()
            .ok_or_else(|| MaskError::InferenceFailed("face crop has inconsistent size".into()))?;
        let resized = imageops::resize(&image, MASK_INPUT_SIZE, MASK_INPUT_SIZE, FilterType::Triangle);

        let size = MASK_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
        for (x, y, px) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, y as usize, x as usize, c]] = px.0[c] as f32 / 255.0;
            }
        }
        Ok(tensor)
    }
}

impl MaskClassifier for OnnxMaskClassifier {
    fn classify(&mut self, face: &Frame) -> Result<f32, MaskError> {
        if face.is_empty() {
            return Err(MaskError::InferenceFailed("empty face crop".into()));
        }

        let input = Self::preprocess(face)?;
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| MaskError::InferenceFailed(format!("mask score: {e}")))?;

        scores
            .first()
            .copied()
            .ok_or_else(|| MaskError::InferenceFailed("classifier returned no scores".into()))
    }
}
