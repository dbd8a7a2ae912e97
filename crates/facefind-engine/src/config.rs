use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bad config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Thresholds and model selection shared by ingestion and matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum confidence of the first detection in a reference image.
    pub min_ingest_confidence: f32,
    /// Minimum confidence for a probe face to be embedded and compared.
    pub min_match_confidence: f32,
    /// A match requires cosine similarity strictly above this value.
    pub similarity_threshold: f64,
    /// Probe images are shrunk so their longer side is at most this before
    /// detection. 0 disables downscaling.
    pub max_dimension: u32,
    /// Recognition model; also pins the gallery it writes to.
    pub recognition_model_id: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_ingest_confidence: 0.90,
            min_match_confidence: 0.70,
            similarity_threshold: 0.5,
            max_dimension: 1000,
            recognition_model_id: "w600k_r50".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load from an optional TOML file, apply `FACEFIND_*` environment
    /// overrides, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Override fields from `FACEFIND_*` variables returned by `lookup`.
    /// Unparsable values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = parsed(&lookup, "FACEFIND_MIN_INGEST_CONFIDENCE") {
            self.min_ingest_confidence = v;
        }
        if let Some(v) = parsed(&lookup, "FACEFIND_MIN_MATCH_CONFIDENCE") {
            self.min_match_confidence = v;
        }
        if let Some(v) = parsed(&lookup, "FACEFIND_SIMILARITY_THRESHOLD") {
            self.similarity_threshold = v;
        }
        if let Some(v) = parsed(&lookup, "FACEFIND_MAX_DIMENSION") {
            self.max_dimension = v;
        }
        if let Some(v) = lookup("FACEFIND_RECOGNITION_MODEL") {
            self.recognition_model_id = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("min_ingest_confidence", self.min_ingest_confidence),
            ("min_match_confidence", self.min_match_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{name} must be in [0, 1], got {value}")));
            }
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::Invalid(format!(
                "similarity_threshold must be in [-1, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.recognition_model_id.trim().is_empty() {
            return Err(ConfigError::Invalid("recognition_model_id is empty".into()));
        }
        Ok(())
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable config override");
            None
        }
    }
}
