//! Reference-folder ingestion: one folder of images becomes one identity.

use crate::engine::{list_files, Engine, EngineError};
use crate::report::{skip, IngestReport, SkipReason};
use facefind_core::extract::{detect_faces, embed_face, load_image};
use facefind_core::{Embedding, FaceDetector, FaceEmbedder};
use facefind_store::{GalleryStore, StoreError};
use std::path::Path;

impl<D: FaceDetector, E: FaceEmbedder> Engine<D, E> {
    /// Enroll every usable image in `dir` under a new identity.
    ///
    /// Each reference image contributes at most one face: the detector's
    /// first detection, if it clears `min_ingest_confidence`. Per-file
    /// problems are recorded in the report; only store failures abort.
    /// Re-ingesting an existing name creates another identity.
    pub fn ingest<S: GalleryStore>(
        &mut self,
        store: &S,
        dir: &Path,
        name: &str,
        description: &str,
    ) -> Result<IngestReport, EngineError> {
        let files = list_files(dir)?;
        let identity_id = store.create_identity(name, description)?;

        tracing::info!(
            identity_id,
            name,
            dir = %dir.display(),
            files = files.len(),
            "ingesting reference images"
        );

        let mut report = IngestReport {
            identity_id,
            name: name.to_string(),
            files_seen: files.len(),
            embedded: 0,
            skipped: Vec::new(),
            aggregate_committed: false,
        };
        let mut captured: Vec<Embedding> = Vec::new();

        for path in &files {
            let embedding = match self.reference_embedding(path) {
                Ok(embedding) => embedding,
                Err(reason) => {
                    skip(&mut report.skipped, path, None, reason);
                    continue;
                }
            };

            let source = path.display().to_string();
            match store.append_raw_embedding(identity_id, &embedding, &source) {
                Ok(_) => {
                    tracing::info!(file = %source, identity_id, "stored embedding");
                    captured.push(embedding);
                    report.embedded += 1;
                }
                Err(StoreError::DimensionMismatch { expected, actual }) => {
                    skip(
                        &mut report.skipped,
                        path,
                        None,
                        SkipReason::DimensionMismatch { expected, actual },
                    );
                }
                Err(StoreError::NonFiniteVector) => {
                    skip(&mut report.skipped, path, None, SkipReason::NonFiniteEmbedding);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if captured.is_empty() {
            tracing::warn!(identity_id, name, "no usable reference images; no aggregate produced");
        } else {
            match store.commit_aggregate(identity_id, name, description, &captured) {
                Ok(_) => report.aggregate_committed = true,
                Err(e) if !e.is_fatal() => {
                    tracing::warn!(identity_id, name, error = %e, "aggregate rejected; identity cannot be matched");
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(
            identity_id,
            name,
            embedded = report.embedded,
            skipped = report.skipped.len(),
            "ingestion finished"
        );

        Ok(report)
    }

    /// Embed the first detected face of a reference image.
    fn reference_embedding(&mut self, path: &Path) -> Result<Embedding, SkipReason> {
        let image = load_image(path)?;
        let detections = detect_faces(&mut self.detector, &image, None)?;

        // First detection only, whatever its rank; later faces are ignored.
        let Some(face) = detections.first() else {
            return Err(SkipReason::NoFaceDetected);
        };

        let floor = self.config.min_ingest_confidence;
        if face.confidence < floor {
            return Err(SkipReason::LowConfidence {
                confidence: face.confidence,
                floor,
            });
        }

        Ok(embed_face(&mut self.embedder, &image, face)?)
    }
}
