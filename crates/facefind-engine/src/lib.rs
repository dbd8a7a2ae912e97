//! facefind-engine — Ingestion and matching pipelines over a face gallery.
//!
//! [`Engine`] owns a detector, an embedder and the pipeline thresholds.
//! Ingestion turns a folder of reference images into one identity with an
//! aggregate embedding; matching reports every probe face whose similarity to
//! an identity clears the threshold.

pub mod config;
pub mod engine;
pub mod ingest;
pub mod matching;
pub mod report;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, PipelineConfig};
pub use engine::{list_files, Engine, EngineError};
pub use matching::{matches_above, GallerySnapshot};
pub use report::{rank_matches, FileDiagnostic, IngestReport, MatchRecord, MatchReport, SkipReason};
