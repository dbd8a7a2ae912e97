//! Deterministic adapters and image fixtures for pipeline tests.
//!
//! Test images are solid blocks of colour. The detector looks up its
//! detections by the red value of the top-left pixel, and the embedder looks
//! up its vector by the red value of the crop's top-left pixel, so each block
//! embeds to a known vector.

use crate::config::PipelineConfig;
use crate::engine::Engine;
use facefind_core::{BoundingBox, Embedding, FaceDetector, FaceEmbedder};
use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DIM: usize = 2;
pub const MODEL: &str = "fake-model";

/// Side length of one face block in fixture images.
pub const BLOCK: u32 = 40;

#[derive(Debug, Error)]
#[error("scripted failure for shade {0}")]
pub struct FakeError(pub u8);

#[derive(Default)]
pub struct ScriptedDetector {
    pub boxes: HashMap<u8, Vec<BoundingBox>>,
    pub failing: Vec<u8>,
    /// Dimensions of every image the detector was given.
    pub seen: Vec<(u32, u32)>,
}

impl ScriptedDetector {
    pub fn with(mut self, shade: u8, boxes: Vec<BoundingBox>) -> Self {
        self.boxes.insert(shade, boxes);
        self
    }

    pub fn failing(mut self, shade: u8) -> Self {
        self.failing.push(shade);
        self
    }
}

impl FaceDetector for ScriptedDetector {
    type Error = FakeError;

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, FakeError> {
        self.seen.push(image.dimensions());
        let shade = image.get_pixel(0, 0)[0];
        if self.failing.contains(&shade) {
            return Err(FakeError(shade));
        }
        Ok(self.boxes.get(&shade).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct ScriptedEmbedder {
    pub vectors: HashMap<u8, Vec<f64>>,
    /// Shades of every crop the embedder was given, in call order.
    pub calls: Vec<u8>,
}

impl ScriptedEmbedder {
    pub fn with(mut self, shade: u8, vector: &[f64]) -> Self {
        self.vectors.insert(shade, vector.to_vec());
        self
    }
}

impl FaceEmbedder for ScriptedEmbedder {
    type Error = FakeError;

    fn dim(&self) -> usize {
        DIM
    }

    fn model_id(&self) -> &str {
        MODEL
    }

    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, FakeError> {
        let shade = face.get_pixel(0, 0)[0];
        self.calls.push(shade);
        self.vectors
            .get(&shade)
            .map(|v| Embedding::new(v.clone()))
            .ok_or(FakeError(shade))
    }
}

pub fn engine(
    detector: ScriptedDetector,
    embedder: ScriptedEmbedder,
) -> Engine<ScriptedDetector, ScriptedEmbedder> {
    let config = PipelineConfig {
        recognition_model_id: MODEL.to_string(),
        ..Default::default()
    };
    Engine::new(detector, embedder, config)
}

/// Box covering face block `index` (blocks are laid out left to right).
pub fn block(index: u32, confidence: f32) -> BoundingBox {
    BoundingBox {
        x: (index * BLOCK) as f32,
        y: 0.0,
        width: BLOCK as f32,
        height: BLOCK as f32,
        confidence,
    }
}

/// Write a PNG made of one `BLOCK`-sized square per shade, left to right.
pub fn write_blocks(dir: &Path, name: &str, shades: &[u8]) -> PathBuf {
    let width = BLOCK * shades.len() as u32;
    let image = RgbImage::from_fn(width, BLOCK, |x, _| Rgb([shades[(x / BLOCK) as usize], 0, 0]));
    let path = dir.join(name);
    image.save(&path).unwrap();
    path
}

/// Write a PNG of `width`x`height` filled with one shade.
pub fn write_solid(dir: &Path, name: &str, shade: u8, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(width, height, Rgb([shade, 0, 0])).save(&path).unwrap();
    path
}
