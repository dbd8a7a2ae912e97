//! Probe-folder matching against the gallery's aggregate embeddings.

use crate::engine::{list_files, Engine, EngineError};
use crate::report::{skip, MatchRecord, MatchReport, SkipReason};
use facefind_core::extract::{detect_faces, embed_face, load_image};
use facefind_core::{BoundingBox, Embedding, Face, FaceDetector, FaceEmbedder};
use facefind_store::{AggregateEmbedding, GalleryStore, StoreError};
use image::RgbImage;
use std::path::Path;

/// Aggregate embeddings loaded once for a whole matching run.
///
/// Immutable after loading, so it can be shared across threads without
/// locking; gallery writes made during a run are not observed.
#[derive(Debug, Clone)]
pub struct GallerySnapshot {
    dim: usize,
    entries: Vec<AggregateEmbedding>,
}

impl GallerySnapshot {
    pub fn load<S: GalleryStore>(store: &S) -> Result<Self, StoreError> {
        let entries = store.list_aggregates()?;
        tracing::info!(identities = entries.len(), dim = store.dim(), "loaded gallery snapshot");
        Ok(Self {
            dim: store.dim(),
            entries,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn entries(&self) -> &[AggregateEmbedding] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Every gallery entry whose cosine similarity to `probe` is strictly above
/// `threshold`, with that similarity.
///
/// This is a filter, not a classifier: one probe can match many identities.
/// Undefined similarities (zero-norm or mismatched vectors) never match.
pub fn matches_above<'g>(
    probe: &'g Embedding,
    gallery: &'g [AggregateEmbedding],
    threshold: f64,
) -> impl Iterator<Item = (&'g AggregateEmbedding, f64)> + 'g {
    gallery.iter().filter_map(move |entry| {
        let similarity = probe.similarity(&entry.embedding)?;
        (similarity > threshold).then_some((entry, similarity))
    })
}

impl<D: FaceDetector, E: FaceEmbedder> Engine<D, E> {
    /// Load the gallery once, then match every probe image in `dir` against it.
    pub fn find_matches<S: GalleryStore>(
        &mut self,
        store: &S,
        dir: &Path,
    ) -> Result<MatchReport, EngineError> {
        let gallery = GallerySnapshot::load(store)?;
        self.match_folder(&gallery, dir)
    }

    /// Match every probe image in `dir` against a loaded gallery.
    ///
    /// Every face at or above `min_match_confidence` is embedded and compared
    /// with every identity, and each pair above `similarity_threshold` yields a
    /// [`MatchRecord`]. Records are returned in no particular order.
    pub fn match_folder(
        &mut self,
        gallery: &GallerySnapshot,
        dir: &Path,
    ) -> Result<MatchReport, EngineError> {
        let files = list_files(dir)?;
        if gallery.is_empty() {
            tracing::warn!("gallery has no aggregate embeddings; no matches are possible");
        }

        tracing::info!(
            dir = %dir.display(),
            files = files.len(),
            identities = gallery.len(),
            threshold = self.config.similarity_threshold,
            "matching probe images"
        );

        let mut report = MatchReport {
            files_seen: files.len(),
            ..Default::default()
        };

        for path in &files {
            let (image, faces) = match self.probe_faces(path) {
                Ok(probe) => probe,
                Err(reason) => {
                    skip(&mut report.skipped, path, None, reason);
                    continue;
                }
            };

            for (face_index, bbox) in faces {
                let face = match self.embed_probe(&image, bbox, gallery.dim()) {
                    Ok(face) => face,
                    Err(reason) => {
                        skip(&mut report.skipped, path, Some(face_index), reason);
                        continue;
                    }
                };
                report.faces_compared += 1;

                for (entry, similarity) in
                    matches_above(&face.embedding, gallery.entries(), self.config.similarity_threshold)
                {
                    tracing::info!(
                        image = %path.display(),
                        face = face_index,
                        person = %entry.name,
                        similarity,
                        "match found"
                    );
                    report.matches.push(MatchRecord {
                        probe_image_path: path.clone(),
                        face_index,
                        face_box: face.bbox.clone(),
                        identity_id: entry.identity_id,
                        identity_name: entry.name.clone(),
                        identity_description: entry.description.clone(),
                        similarity,
                    });
                }
            }
        }

        tracing::info!(
            files = report.files_seen,
            faces = report.faces_compared,
            matches = report.matches.len(),
            skipped = report.skipped.len(),
            "matching finished"
        );

        Ok(report)
    }

    /// Decode a probe image and keep the detections clearing the confidence
    /// floor, with their index in detector order.
    fn probe_faces(&mut self, path: &Path) -> Result<(RgbImage, Vec<(usize, BoundingBox)>), SkipReason> {
        let image = load_image(path)?;
        let detections = detect_faces(&mut self.detector, &image, Some(self.config.max_dimension))?;
        if detections.is_empty() {
            return Err(SkipReason::NoFaceDetected);
        }

        let floor = self.config.min_match_confidence;
        let best = detections.iter().map(|d| d.confidence).fold(f32::MIN, f32::max);
        let qualifying: Vec<(usize, BoundingBox)> = detections
            .into_iter()
            .enumerate()
            .filter(|(_, d)| d.confidence >= floor)
            .collect();

        if qualifying.is_empty() {
            return Err(SkipReason::LowConfidence {
                confidence: best,
                floor,
            });
        }

        Ok((image, qualifying))
    }

    fn embed_probe(
        &mut self,
        image: &RgbImage,
        bbox: BoundingBox,
        expected_dim: usize,
    ) -> Result<Face, SkipReason> {
        let embedding = embed_face(&mut self.embedder, image, &bbox)?;
        if embedding.dim() != expected_dim {
            return Err(SkipReason::DimensionMismatch {
                expected: expected_dim,
                actual: embedding.dim(),
            });
        }
        if !embedding.is_finite() {
            return Err(SkipReason::NonFiniteEmbedding);
        }
        Ok(Face { bbox, embedding })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use facefind_store::SqliteGallery;

    fn store() -> SqliteGallery {
        SqliteGallery::open_in_memory(MODEL, DIM).unwrap()
    }

    fn enroll(store: &SqliteGallery, name: &str, vector: &[f64]) -> i64 {
        let id = store.create_identity(name, "").unwrap();
        store
            .commit_aggregate(id, name, "", &[Embedding::new(vector.to_vec())])
            .unwrap();
        id
    }

    fn entry(id: i64, vector: &[f64]) -> AggregateEmbedding {
        AggregateEmbedding {
            identity_id: id,
            name: format!("person {id}"),
            description: String::new(),
            embedding: Embedding::new(vector.to_vec()),
        }
    }

    #[test]
    fn test_matches_above_is_a_filter() {
        let gallery = vec![entry(1, &[1.0, 0.0]), entry(2, &[0.9, 0.1]), entry(3, &[0.0, 1.0])];
        let probe = Embedding::new(vec![1.0, 0.0]);

        let ids: Vec<i64> = matches_above(&probe, &gallery, 0.5)
            .map(|(e, _)| e.identity_id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_matches_above_threshold_is_strict() {
        // cos([3,4], [1,0]) is exactly 0.6
        let gallery = vec![entry(1, &[1.0, 0.0])];
        let probe = Embedding::new(vec![3.0, 4.0]);

        assert_eq!(matches_above(&probe, &gallery, 0.6).count(), 0);
        assert_eq!(matches_above(&probe, &gallery, 0.59).count(), 1);
    }

    #[test]
    fn test_matches_above_monotone_in_threshold() {
        let gallery = vec![
            entry(1, &[1.0, 0.0]),
            entry(2, &[0.8, 0.6]),
            entry(3, &[0.6, 0.8]),
            entry(4, &[0.0, 1.0]),
            entry(5, &[-1.0, 0.0]),
        ];
        let probe = Embedding::new(vec![1.0, 0.0]);

        let mut previous = usize::MAX;
        for threshold in [-1.0, -0.5, 0.0, 0.3, 0.6, 0.7, 0.9, 0.99, 1.0] {
            let count = matches_above(&probe, &gallery, threshold).count();
            assert!(count <= previous, "threshold {threshold} matched more than a lower one");
            previous = count;
        }
        assert_eq!(previous, 0);
    }

    #[test]
    fn test_zero_norm_never_matches() {
        let gallery = vec![entry(1, &[0.0, 0.0]), entry(2, &[1.0, 0.0])];
        let zero = Embedding::new(vec![0.0, 0.0]);
        assert_eq!(matches_above(&zero, &gallery, -1.0).count(), 0);

        let probe = Embedding::new(vec![1.0, 0.0]);
        let ids: Vec<i64> = matches_above(&probe, &gallery, -1.0)
            .map(|(e, _)| e.identity_id)
            .collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_ingest_then_match_single_identity() {
        let refs = tempfile::tempdir().unwrap();
        write_blocks(refs.path(), "ada_1.png", &[10]);
        write_blocks(refs.path(), "ada_2.png", &[20]);
        let probes = tempfile::tempdir().unwrap();
        write_blocks(probes.path(), "frame_0001.png", &[50]);
        write_blocks(probes.path(), "frame_0002.png", &[60]);

        let detector = ScriptedDetector::default()
            .with(10, vec![block(0, 0.99)])
            .with(20, vec![block(0, 0.99)])
            .with(50, vec![block(0, 0.90)])
            .with(60, vec![block(0, 0.90)]);
        let embedder = ScriptedEmbedder::default()
            .with(10, &[1.0, 0.2])
            .with(20, &[1.0, -0.2])
            .with(50, &[0.81, (1.0f64 - 0.81 * 0.81).sqrt()])
            .with(60, &[0.0, 1.0]);
        let mut engine = engine(detector, embedder);
        let store = store();

        let ingest = engine
            .ingest(&store, refs.path(), "Ada Lovelace", "Mathematician")
            .unwrap();
        let report = engine.find_matches(&store, probes.path()).unwrap();

        assert_eq!(report.files_seen, 2);
        assert_eq!(report.faces_compared, 2);
        assert!(report.skipped.is_empty());
        assert_eq!(report.matches.len(), 1);

        let m = &report.matches[0];
        assert!(m.probe_image_path.ends_with("frame_0001.png"));
        assert_eq!(m.face_index, 0);
        assert_eq!(m.identity_id, ingest.identity_id);
        assert_eq!(m.identity_name, "Ada Lovelace");
        assert_eq!(m.identity_description, "Mathematician");
        assert!((m.similarity - 0.81).abs() < 1e-9);
    }

    #[test]
    fn test_every_qualifying_face_is_compared() {
        let probes = tempfile::tempdir().unwrap();
        write_blocks(probes.path(), "group.png", &[10, 20]);

        let detector =
            ScriptedDetector::default().with(10, vec![block(0, 0.95), block(1, 0.80)]);
        let embedder = ScriptedEmbedder::default()
            .with(10, &[1.0, 0.0])
            .with(20, &[0.0, 1.0]);
        let mut engine = engine(detector, embedder);
        let store = store();
        let ada = enroll(&store, "Ada", &[1.0, 0.0]);
        let grace = enroll(&store, "Grace", &[0.0, 1.0]);

        let report = engine.find_matches(&store, probes.path()).unwrap();

        assert_eq!(report.faces_compared, 2);
        let mut pairs: Vec<(usize, i64)> = report
            .matches
            .iter()
            .map(|m| (m.face_index, m.identity_id))
            .collect();
        pairs.sort();
        assert_eq!(pairs, vec![(0, ada), (1, grace)]);
    }

    #[test]
    fn test_two_faces_matching_one_identity_give_two_records() {
        let probes = tempfile::tempdir().unwrap();
        write_blocks(probes.path(), "twins.png", &[10, 20]);

        let detector =
            ScriptedDetector::default().with(10, vec![block(0, 0.99), block(1, 0.97)]);
        let embedder = ScriptedEmbedder::default()
            .with(10, &[1.0, 0.1])
            .with(20, &[1.0, -0.1]);
        let mut engine = engine(detector, embedder);
        let store = store();
        let ada = enroll(&store, "Ada", &[1.0, 0.0]);

        let report = engine.find_matches(&store, probes.path()).unwrap();

        assert_eq!(report.matches.len(), 2);
        assert!(report.matches.iter().all(|m| m.identity_id == ada));
        let faces: Vec<usize> = report.matches.iter().map(|m| m.face_index).collect();
        assert_eq!(faces, vec![0, 1]);
        assert_eq!(report.matches[1].face_box, block(1, 0.97));
    }

    #[test]
    fn test_non_finite_probe_embedding_is_skipped() {
        let probes = tempfile::tempdir().unwrap();
        write_blocks(probes.path(), "probe.png", &[10]);

        let detector = ScriptedDetector::default().with(10, vec![block(0, 0.99)]);
        let embedder = ScriptedEmbedder::default().with(10, &[f64::NAN, 1.0]);
        let mut engine = engine(detector, embedder);
        let store = store();
        enroll(&store, "Ada", &[0.0, 1.0]);

        let report = engine.find_matches(&store, probes.path()).unwrap();

        assert!(report.matches.is_empty());
        assert_eq!(report.faces_compared, 0);
        assert_eq!(report.skipped[0].reason, SkipReason::NonFiniteEmbedding);
        assert_eq!(report.skipped[0].face, Some(0));
    }

    #[test]
    fn test_one_face_can_match_several_identities() {
        let probes = tempfile::tempdir().unwrap();
        write_blocks(probes.path(), "probe.png", &[10]);

        let detector = ScriptedDetector::default().with(10, vec![block(0, 0.99)]);
        let embedder = ScriptedEmbedder::default().with(10, &[1.0, 0.0]);
        let mut engine = engine(detector, embedder);
        let store = store();
        enroll(&store, "Ada", &[1.0, 0.1]);
        enroll(&store, "Ada", &[1.0, -0.1]);

        let report = engine.find_matches(&store, probes.path()).unwrap();
        assert_eq!(report.matches.len(), 2);
    }

    #[test]
    fn test_low_confidence_faces_are_not_compared() {
        let probes = tempfile::tempdir().unwrap();
        write_blocks(probes.path(), "a_mixed.png", &[10, 20]);
        write_blocks(probes.path(), "b_blurry.png", &[30, 40]);

        let detector = ScriptedDetector::default()
            .with(10, vec![block(0, 0.95), block(1, 0.50)])
            .with(30, vec![block(0, 0.65), block(1, 0.40)]);
        let embedder = ScriptedEmbedder::default()
            .with(10, &[1.0, 0.0])
            .with(20, &[1.0, 0.0])
            .with(30, &[1.0, 0.0]);
        let mut engine = engine(detector, embedder);
        let store = store();
        enroll(&store, "Ada", &[1.0, 0.0]);

        let report = engine.find_matches(&store, probes.path()).unwrap();

        assert_eq!(engine.embedder.calls, vec![10]);
        assert_eq!(report.faces_compared, 1);
        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].path.ends_with("b_blurry.png"));
        assert!(matches!(
            report.skipped[0].reason,
            SkipReason::LowConfidence { confidence, floor }
                if (confidence - 0.65).abs() < 1e-6 && (floor - 0.70).abs() < 1e-6
        ));
    }

    #[test]
    fn test_unreadable_probe_does_not_stop_the_run() {
        let probes = tempfile::tempdir().unwrap();
        std::fs::write(probes.path().join("a_notes.txt"), b"meeting notes").unwrap();
        write_blocks(probes.path(), "b_frame.png", &[10]);
        write_blocks(probes.path(), "c_empty.png", &[99]);

        let detector = ScriptedDetector::default().with(10, vec![block(0, 0.99)]);
        let embedder = ScriptedEmbedder::default().with(10, &[1.0, 0.0]);
        let mut engine = engine(detector, embedder);
        let store = store();
        enroll(&store, "Ada", &[1.0, 0.0]);

        let report = engine.find_matches(&store, probes.path()).unwrap();

        assert_eq!(report.files_seen, 3);
        assert_eq!(report.matches.len(), 1);
        assert!(report.matches[0].probe_image_path.ends_with("b_frame.png"));
        assert!(matches!(report.skipped[0].reason, SkipReason::Unreadable { .. }));
        assert_eq!(report.skipped[1].reason, SkipReason::NoFaceDetected);
    }

    #[test]
    fn test_embedder_failure_skips_only_that_face() {
        let probes = tempfile::tempdir().unwrap();
        write_blocks(probes.path(), "pair.png", &[10, 20]);

        let detector =
            ScriptedDetector::default().with(10, vec![block(0, 0.99), block(1, 0.99)]);
        // No vector for shade 10: the first face fails, the second still matches.
        let embedder = ScriptedEmbedder::default().with(20, &[0.0, 1.0]);
        let mut engine = engine(detector, embedder);
        let store = store();
        enroll(&store, "Grace", &[0.0, 1.0]);

        let report = engine.find_matches(&store, probes.path()).unwrap();

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].face, Some(0));
        assert!(matches!(report.skipped[0].reason, SkipReason::AdapterFailed { .. }));
        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].face_index, 1);
    }

    #[test]
    fn test_empty_gallery_yields_no_matches() {
        let probes = tempfile::tempdir().unwrap();
        write_blocks(probes.path(), "probe.png", &[10]);

        let detector = ScriptedDetector::default().with(10, vec![block(0, 0.99)]);
        let embedder = ScriptedEmbedder::default().with(10, &[1.0, 0.0]);
        let mut engine = engine(detector, embedder);
        let store = store();

        let report = engine.find_matches(&store, probes.path()).unwrap();
        assert!(report.matches.is_empty());
        assert!(report.skipped.is_empty());
        assert_eq!(report.files_seen, 1);
    }

    #[test]
    fn test_snapshot_ignores_later_writes() {
        let probes = tempfile::tempdir().unwrap();
        write_blocks(probes.path(), "probe.png", &[10]);

        let detector = ScriptedDetector::default().with(10, vec![block(0, 0.99)]);
        let embedder = ScriptedEmbedder::default().with(10, &[1.0, 0.0]);
        let mut engine = engine(detector, embedder);
        let store = store();
        let ada = enroll(&store, "Ada", &[1.0, 0.0]);

        let snapshot = GallerySnapshot::load(&store).unwrap();
        enroll(&store, "Ada again", &[1.0, 0.0]);

        let report = engine.match_folder(&snapshot, probes.path()).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].identity_id, ada);
    }

    #[test]
    fn test_probe_dimension_mismatch_is_skipped() {
        let probes = tempfile::tempdir().unwrap();
        write_blocks(probes.path(), "probe.png", &[10]);

        let detector = ScriptedDetector::default().with(10, vec![block(0, 0.99)]);
        let embedder = ScriptedEmbedder::default().with(10, &[1.0, 0.0, 0.0]);
        let mut engine = engine(detector, embedder);
        let store = store();
        enroll(&store, "Ada", &[1.0, 0.0]);

        let report = engine.find_matches(&store, probes.path()).unwrap();

        assert!(report.matches.is_empty());
        assert_eq!(report.faces_compared, 0);
        assert_eq!(
            report.skipped[0].reason,
            SkipReason::DimensionMismatch { expected: 2, actual: 3 }
        );
        assert_eq!(report.skipped[0].face, Some(0));
    }

    #[test]
    fn test_large_probe_is_downscaled_for_detection() {
        let probes = tempfile::tempdir().unwrap();
        write_solid(probes.path(), "wide.png", 50, 2400, 1200);

        // Box in detector coordinates; mapped back it covers 96x96 pixels.
        let detector = ScriptedDetector::default().with(50, vec![block(0, 0.99)]);
        let embedder = ScriptedEmbedder::default().with(50, &[1.0, 0.0]);
        let mut engine = engine(detector, embedder);
        let store = store();
        enroll(&store, "Ada", &[1.0, 0.0]);

        let report = engine.find_matches(&store, probes.path()).unwrap();

        assert_eq!(engine.detector.seen, vec![(1000, 500)]);
        assert_eq!(report.matches.len(), 1);
        let face_box = &report.matches[0].face_box;
        assert!((face_box.width - 96.0).abs() < 1e-3);
        assert!((face_box.height - 96.0).abs() < 1e-3);
    }

    #[test]
    fn test_missing_probe_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(ScriptedDetector::default(), ScriptedEmbedder::default());
        let store = store();

        let err = engine.find_matches(&store, &dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, EngineError::InputDir { .. }));
    }
}
