use std::path::PathBuf;

/// File locations, loaded from environment variables.
///
/// Thresholds live in [`facefind_engine::PipelineConfig`]; this only says
/// where the models and the gallery are.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite gallery file.
    pub db_path: PathBuf,
    /// File name of the SCRFD detection model inside `model_dir`.
    pub detector_model: String,
}

impl Config {
    /// Load configuration from `FACEFIND_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facefind");

        Self {
            model_dir: lookup("FACEFIND_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("models")),
            db_path: lookup("FACEFIND_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("gallery.db")),
            detector_model: lookup("FACEFIND_DETECTOR_MODEL")
                .unwrap_or_else(|| "det_10g.onnx".to_string()),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(&self.detector_model)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the recognition model named by `model_id`.
    pub fn recognition_model_path(&self, model_id: &str) -> String {
        self.model_dir
            .join(format!("{model_id}.onnx"))
            .to_string_lossy()
            .into_owned()
    }
}
