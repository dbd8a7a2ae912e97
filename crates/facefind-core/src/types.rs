use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in pixel coordinates of the image it was
/// detected in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector certainty in [0, 1].
    pub confidence: f32,
}

impl BoundingBox {
    /// Map a box detected on a resized image back to the original image.
    ///
    /// `scale` is the factor that was applied to the original (`resized = original * scale`).
    pub fn unscale(&self, scale: f32) -> BoundingBox {
        if scale <= 0.0 || scale == 1.0 {
            return self.clone();
        }
        BoundingBox {
            x: self.x / scale,
            y: self.y / scale,
            width: self.width / scale,
            height: self.height / scale,
            confidence: self.confidence,
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f64>,
}

impl Embedding {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1], or `None` when the comparison is undefined:
    /// either vector has zero norm, or the dimensions differ. Callers treat
    /// `None` as a non-match.
    pub fn similarity(&self, other: &Embedding) -> Option<f64> {
        if self.values.len() != other.values.len() {
            return None;
        }

        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 && denom.is_finite() {
            // Rounding can push |dot / denom| a hair past 1.
            Some((dot / denom).clamp(-1.0, 1.0))
        } else {
            None
        }
    }

    /// Element-wise arithmetic mean of a non-empty set of equal-length vectors.
    ///
    /// Returns `None` for an empty input or when the dimensions disagree.
    pub fn mean<'a, I>(vectors: I) -> Option<Embedding>
    where
        I: IntoIterator<Item = &'a Embedding>,
    {
        let mut iter = vectors.into_iter();
        let first = iter.next()?;
        let rest: Vec<&Embedding> = iter.collect();
        let mut sum = first.values.clone();
        let mut count = 1usize;

        for v in &rest {
            if v.values.len() != sum.len() {
                return None;
            }
            for (acc, x) in sum.iter_mut().zip(v.values.iter()) {
                *acc += x;
            }
            count += 1;
        }

        let n = count as f64;
        if sum.iter().all(|s| s.is_finite()) {
            return Some(Embedding {
                values: sum.into_iter().map(|s| s / n).collect(),
            });
        }

        // The plain sum overflowed; scale each term first so finite inputs
        // always give a finite mean.
        let mut scaled = first.values.iter().map(|x| x / n).collect::<Vec<_>>();
        for v in rest {
            for (acc, x) in scaled.iter_mut().zip(v.values.iter()) {
                *acc += x / n;
            }
        }
        Some(Embedding { values: scaled })
    }

    /// True when no component is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

impl From<Vec<f64>> for Embedding {
    fn from(values: Vec<f64>) -> Self {
        Self { values }
    }
}

/// A face extracted from one image: where it was found and what it embeds to.
#[derive(Debug, Clone)]
pub struct Face {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}
