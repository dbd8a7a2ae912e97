use crate::config::PipelineConfig;
use facefind_core::{FaceDetector, FaceEmbedder};
use facefind_store::StoreError;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that abort a whole run. Everything per file is a
/// [`SkipReason`](crate::SkipReason) instead.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("gallery store: {0}")]
    Store(#[from] StoreError),
    #[error("cannot list input directory {path}: {source}")]
    InputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Detector, embedder and thresholds, constructed once by the caller and
/// shared by ingestion and matching runs.
///
/// Runs are sequential: one file at a time, one comparison at a time.
pub struct Engine<D, E> {
    pub(crate) detector: D,
    pub(crate) embedder: E,
    pub(crate) config: PipelineConfig,
}

impl<D: FaceDetector, E: FaceEmbedder> Engine<D, E> {
    pub fn new(detector: D, embedder: E, config: PipelineConfig) -> Self {
        if embedder.model_id() != config.recognition_model_id {
            tracing::warn!(
                embedder = embedder.model_id(),
                configured = %config.recognition_model_id,
                "embedder model differs from configured recognition model"
            );
        }
        Self {
            detector,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

/// Regular files directly inside `dir`, sorted by file name.
///
/// Subdirectories are ignored; every file is attempted, so non-images show up
/// later as per-file skips.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>, EngineError> {
    let input_err = |source| EngineError::InputDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(input_err)? {
        let path = entry.map_err(input_err)?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
