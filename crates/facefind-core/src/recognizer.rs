//! ArcFace face embedder via ONNX Runtime.
//!
//! Resizes a face crop to 112x112 and extracts an L2-normalized 512-dimensional
//! embedding. No landmark alignment is applied; the crop is used as-is.

use crate::adapter::FaceEmbedder;
use crate::types::Embedding;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // NOT 128.0, ArcFace uses symmetric normalization
pub const ARCFACE_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face crop is empty")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face embedder.
pub struct ArcFaceEmbedder {
    session: Session,
    model_id: String,
}

impl ArcFaceEmbedder {
    /// Load the ArcFace ONNX model from the given path.
    ///
    /// `model_id` tags every vector this embedder produces in the gallery.
    pub fn load(model_path: &str, model_id: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            model_id,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self {
            session,
            model_id: model_id.to_string(),
        })
    }

    fn extract(&mut self, face: &RgbImage) -> Result<Embedding, RecognizerError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(RecognizerError::EmptyCrop);
        }

        let input = preprocess(face);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw_data.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw_data.len()
            )));
        }

        Ok(Embedding::new(l2_normalize(raw_data)))
    }
}

impl FaceEmbedder for ArcFaceEmbedder {
    type Error = RecognizerError;

    fn dim(&self) -> usize {
        ARCFACE_EMBEDDING_DIM
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, RecognizerError> {
        self.extract(face)
    }
}

/// Widen to f64 and scale to unit length. Zero vectors are returned unchanged.
fn l2_normalize(raw: &[f32]) -> Vec<f64> {
    let values: Vec<f64> = raw.iter().map(|&x| f64::from(x)).collect();
    let norm = values.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        values.into_iter().map(|x| x / norm).collect()
    } else {
        values
    }
}

/// Resize a face crop to 112x112 and convert it into a NCHW float tensor.
fn preprocess(face: &RgbImage) -> Array4<f32> {
    let size = ARCFACE_INPUT_SIZE;
    let resized = imageops::resize(face, size as u32, size as u32, FilterType::Triangle);
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }

    tensor
}
