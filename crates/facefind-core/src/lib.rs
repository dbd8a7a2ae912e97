//! facefind-core — Face types, model contracts and ONNX adapters.
//!
//! The pipelines depend only on the [`FaceDetector`] and [`FaceEmbedder`]
//! traits. SCRFD detection and ArcFace embedding implement them via ONNX
//! Runtime for CPU inference.

pub mod adapter;
pub mod detector;
pub mod extract;
pub mod recognizer;
pub mod types;

pub use adapter::{FaceDetector, FaceEmbedder};
pub use detector::ScrfdDetector;
pub use extract::ExtractError;
pub use recognizer::ArcFaceEmbedder;
pub use types::{BoundingBox, Embedding, Face};
