//! Capability contracts for the two models the pipelines consume.
//!
//! Ingestion and matching only ever see these traits, so they run unchanged
//! against the ONNX adapters in this crate or against scripted fakes.

use crate::types::{BoundingBox, Embedding};
use image::RgbImage;

/// Finds faces in an image.
pub trait FaceDetector {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Return every detection in adapter order. Confidence is in [0, 1].
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, Self::Error>;
}

/// Turns a cropped face into a fixed-length vector.
pub trait FaceEmbedder {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Dimension `D` of every vector this embedder returns.
    fn dim(&self) -> usize;

    /// Identifier of the recognition model (e.g. "w600k_r50").
    fn model_id(&self) -> &str;

    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, Self::Error>;
}
