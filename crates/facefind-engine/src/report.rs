//! Run outcomes: per-file diagnostics, match records and run summaries.

use facefind_core::{BoundingBox, ExtractError};
use facefind_store::IdentityId;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Why a file (or one face in it) contributed nothing. Never fatal to a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    NoFaceDetected,
    LowConfidence { confidence: f32, floor: f32 },
    DimensionMismatch { expected: usize, actual: usize },
    /// The embedder returned NaN or infinite components.
    NonFiniteEmbedding,
    /// The file could not be decoded as an image.
    Unreadable { error: String },
    /// The detector or embedder failed, or the face could not be cropped.
    AdapterFailed { error: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoFaceDetected => write!(f, "no face detected"),
            SkipReason::LowConfidence { confidence, floor } => {
                write!(f, "low confidence detection ({confidence:.3} < {floor:.3})")
            }
            SkipReason::DimensionMismatch { expected, actual } => {
                write!(f, "embedding has {actual} dimensions, expected {expected}")
            }
            SkipReason::NonFiniteEmbedding => write!(f, "embedding contains NaN or infinite values"),
            SkipReason::Unreadable { error } => write!(f, "unreadable image: {error}"),
            SkipReason::AdapterFailed { error } => write!(f, "{error}"),
        }
    }
}

impl From<ExtractError> for SkipReason {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Decode(e) => SkipReason::Unreadable { error: e.to_string() },
            other => SkipReason::AdapterFailed { error: other.to_string() },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileDiagnostic {
    pub path: PathBuf,
    /// Index of the face within the image's detections, when the skip is per face.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face: Option<usize>,
    pub reason: SkipReason,
}

/// Record a skip in `skipped` and log it.
pub(crate) fn skip(skipped: &mut Vec<FileDiagnostic>, path: &Path, face: Option<usize>, reason: SkipReason) {
    tracing::warn!(file = %path.display(), ?face, %reason, "skipped");
    skipped.push(FileDiagnostic {
        path: path.to_path_buf(),
        face,
        reason,
    });
}

/// Outcome of ingesting one folder for one identity.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub identity_id: IdentityId,
    pub name: String,
    pub files_seen: usize,
    pub embedded: usize,
    pub skipped: Vec<FileDiagnostic>,
    /// False when no reference image produced an embedding.
    pub aggregate_committed: bool,
}

/// One (probe face, identity) pair above the similarity threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchRecord {
    pub probe_image_path: PathBuf,
    /// Index of the matching face among the image's detections.
    pub face_index: usize,
    /// Where the face is, in original image coordinates.
    pub face_box: BoundingBox,
    pub identity_id: IdentityId,
    pub identity_name: String,
    pub identity_description: String,
    pub similarity: f64,
}

/// Outcome of matching one probe folder. `matches` is unordered.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchReport {
    pub matches: Vec<MatchRecord>,
    pub files_seen: usize,
    pub faces_compared: usize,
    pub skipped: Vec<FileDiagnostic>,
}

/// Order matches by similarity, highest first, for presentation.
pub fn rank_matches(matches: &mut [MatchRecord]) {
    matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
}
