//! ArcFace face embedder via ONNX Runtime.
//!
//! Extracts 512-dimensional embeddings from landmark-aligned face crops,
//! using the w600k_r50 ArcFace model.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::frame::{FaceCrop, Frame};
use crate::types::Embedding;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // NOT 128.0; ArcFace uses symmetric normalization
pub const ARCFACE_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}; download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Turns a cropped face into an identity embedding.
pub trait FaceEmbedder: Send {
    /// Length of every embedding this embedder produces.
    fn dimension(&self) -> usize;

    /// `Ok(None)` when the crop cannot be normalised into a usable face
    /// (no landmarks to align on, or a degenerate output vector).
    fn embed(&mut self, face: &FaceCrop) -> Result<Option<Embedding>, RecognizerError>;
}

/// ArcFace-based embedder.
pub struct ArcFaceEmbedder {
    session: Session,
}

impl ArcFaceEmbedder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Preprocess a 112x112 aligned RGB face into a NCHW float tensor.
    fn preprocess(aligned: &Frame) -> Array4<f32> {
        let size = ALIGNED_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (i, px) in aligned.data.chunks_exact(3).take(size * size).enumerate() {
            let (y, x) = (i / size, i % size);
            for c in 0..3 {
                tensor[[0, c, y, x]] = (px[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }

        tensor
    }
}

/// L2-normalize `raw`; `None` when its norm is zero.
fn l2_normalize(raw: &[f32]) -> Option<Vec<f32>> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        Some(raw.iter().map(|x| x / norm).collect())
    } else {
        None
    }
}

impl FaceEmbedder for ArcFaceEmbedder {
    fn dimension(&self) -> usize {
        ARCFACE_EMBEDDING_DIM
    }

    fn embed(&mut self, face: &FaceCrop) -> Result<Option<Embedding>, RecognizerError> {
        let Some(landmarks) = face.landmarks.as_ref() else {
            tracing::debug!("face crop has no landmarks; cannot align");
            return Ok(None);
        };

        let aligned = alignment::align_face(&face.image, landmarks);
        let input = Self::preprocess(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(l2_normalize(raw).map(Embedding::new))
    }
}
