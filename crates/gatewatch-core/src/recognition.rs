//! Recognition adapter: the only place engine errors are observed.
//!
//! Both calls fail soft. A presence failure looks like "no face", a matching
//! failure looks like "no face / Unknown", and the caller never sees an
//! [`EngineError`].

use crate::engine::{Embedder, EngineError, PresenceDetector};
use crate::gallery::{Gallery, GalleryError};
use crate::types::{CosineMatcher, FaceCandidate, Matcher, RecognitionOutcome};
use image::DynamicImage;
use std::path::PathBuf;

/// Candidates must score strictly above this to count as a face.
pub const DEFAULT_PRESENCE_FLOOR: f32 = 0.70;

/// Matches further than this (cosine distance) are treated as Unknown.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.40;

/// Wraps the presence filter, the embedder and the gallery behind two calls.
pub struct RecognitionAdapter<D, E> {
    detector: D,
    embedder: E,
    gallery: Gallery,
    matcher: CosineMatcher,
    presence_floor: f32,
    match_threshold: f64,
}

impl<D: PresenceDetector, E: Embedder> RecognitionAdapter<D, E> {
    pub fn new(detector: D, embedder: E, gallery: Gallery) -> Self {
        Self {
            detector,
            embedder,
            gallery,
            matcher: CosineMatcher,
            presence_floor: DEFAULT_PRESENCE_FLOOR,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }

    pub fn with_thresholds(mut self, presence_floor: f32, match_threshold: f64) -> Self {
        self.presence_floor = presence_floor;
        self.match_threshold = match_threshold;
        self
    }

    pub fn presence_floor(&self) -> f32 {
        self.presence_floor
    }

    pub fn match_threshold(&self) -> f64 {
        self.match_threshold
    }

    /// Face candidates scoring above the presence floor. Empty on engine error.
    pub fn detect_presence(&mut self, image: &DynamicImage) -> Vec<FaceCandidate> {
        match self.detector.detect(image) {
            Ok(candidates) => {
                let total = candidates.len();
                let accepted: Vec<FaceCandidate> = candidates
                    .into_iter()
                    .filter(|c| c.confidence > self.presence_floor)
                    .collect();
                tracing::debug!(total, accepted = accepted.len(), "presence check");
                accepted
            }
            Err(e) => {
                tracing::warn!(error = %e, "presence detection failed; treating as no face");
                Vec::new()
            }
        }
    }

    /// Best gallery match for the frame, downgraded to Unknown past the
    /// match threshold. [`RecognitionOutcome::no_face`] on engine error.
    pub fn match_identity(&mut self, image: &DynamicImage) -> RecognitionOutcome {
        match self.try_match(image) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "identity match failed; treating as no match");
                RecognitionOutcome::no_face()
            }
        }
    }

    fn try_match(&mut self, image: &DynamicImage) -> Result<RecognitionOutcome, EngineError> {
        let Some(query) = self.embedder.embed(image)? else {
            return Ok(RecognitionOutcome::no_face());
        };

        self.ensure_index_matches(query.dim())?;
        let entries = self.gallery.entries(&mut self.embedder)?;
        let outcome = match self.matcher.nearest(&query, entries) {
            Some(m) if m.distance <= self.match_threshold => {
                tracing::info!(subject = %m.subject, distance = m.distance, "gallery match");
                RecognitionOutcome::known(m.subject, m.distance)
            }
            Some(m) => {
                tracing::info!(
                    nearest = %m.subject,
                    distance = m.distance,
                    threshold = self.match_threshold,
                    "nearest subject beyond threshold; unknown"
                );
                RecognitionOutcome::unknown()
            }
            None => {
                tracing::debug!("gallery empty; unknown");
                RecognitionOutcome::unknown()
            }
        };
        Ok(outcome)
    }

    /// An index built by a different embedding model is rebuilt once; if the
    /// engine still disagrees with itself the match fails.
    fn ensure_index_matches(&mut self, dim: usize) -> Result<(), EngineError> {
        let Some(indexed) = self.indexed_dim_other_than(dim)? else {
            return Ok(());
        };
        tracing::warn!(query = dim, indexed, "embedding size changed; rebuilding gallery index");
        self.gallery.invalidate()?;
        match self.indexed_dim_other_than(dim)? {
            Some(gallery) => Err(EngineError::DimensionMismatch { query: dim, gallery }),
            None => Ok(()),
        }
    }

    fn indexed_dim_other_than(&mut self, dim: usize) -> Result<Option<usize>, EngineError> {
        Ok(self
            .gallery
            .entries(&mut self.embedder)?
            .iter()
            .map(|e| e.embedding.dim())
            .find(|&d| d != dim))
    }

    /// Register a reference image; the next match re-indexes the gallery.
    pub fn register(&mut self, name: &str, image: &DynamicImage) -> Result<PathBuf, GalleryError> {
        self.gallery.register(name, image)
    }

    pub fn subject_count(&self) -> Result<usize, GalleryError> {
        self.gallery.subject_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::INDEX_FILE;
    use crate::types::{Embedding, GalleryEntry, UNKNOWN_SUBJECT};
    use image::{Rgb, RgbImage};

    struct FixedDetector(Result<Vec<f32>, ()>);

    impl PresenceDetector for FixedDetector {
        fn detect(&mut self, _: &DynamicImage) -> Result<Vec<FaceCandidate>, EngineError> {
            match &self.0 {
                Ok(scores) => Ok(scores
                    .iter()
                    .map(|&confidence| FaceCandidate {
                        x: 0.0,
                        y: 0.0,
                        width: 10.0,
                        height: 10.0,
                        confidence,
                    })
                    .collect()),
                Err(()) => Err(EngineError::Request("engine down".into())),
            }
        }
    }

    /// Reference images embed as [1, 0]; queries embed as `query`.
    struct QueryEmbedder {
        query: Option<Vec<f32>>,
        fail: bool,
    }

    impl Embedder for QueryEmbedder {
        fn embed(&mut self, image: &DynamicImage) -> Result<Option<Embedding>, EngineError> {
            if self.fail {
                return Err(EngineError::Status { status: 500, body: "boom".into() });
            }
            // Gallery images are white; queries are black.
            let is_reference = image.to_rgb8().get_pixel(0, 0).0[0] > 128;
            if is_reference {
                return Ok(Some(Embedding { values: vec![1.0, 0.0] }));
            }
            Ok(self.query.clone().map(|values| Embedding { values }))
        }
    }

    fn white() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([255, 255, 255])))
    }

    fn black() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])))
    }

    /// Query vector at the given cosine distance from [1, 0].
    fn query_at(distance: f64) -> Vec<f32> {
        let cos = 1.0 - distance;
        let sin = (1.0 - cos * cos).sqrt();
        vec![cos as f32, sin as f32]
    }

    fn adapter(
        dir: &std::path::Path,
        scores: Result<Vec<f32>, ()>,
        embedder: QueryEmbedder,
    ) -> RecognitionAdapter<FixedDetector, QueryEmbedder> {
        let mut gallery = Gallery::open(dir).unwrap();
        gallery.register("alice", &white()).unwrap();
        RecognitionAdapter::new(FixedDetector(scores), embedder, gallery)
    }

    #[test]
    fn test_presence_floor_is_strict() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = QueryEmbedder { query: None, fail: false };
        let mut a = adapter(dir.path(), Ok(vec![0.70, 0.5, 0.71]), embedder);
        let faces = a.detect_presence(&black());
        assert_eq!(faces.len(), 1);
        assert!((faces[0].confidence - 0.71).abs() < 1e-6);
    }

    #[test]
    fn test_presence_fails_soft() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = QueryEmbedder { query: None, fail: false };
        let mut a = adapter(dir.path(), Err(()), embedder);
        assert!(a.detect_presence(&black()).is_empty());
    }

    #[test]
    fn test_match_within_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = QueryEmbedder { query: Some(query_at(0.25)), fail: false };
        let mut a = adapter(dir.path(), Ok(vec![0.9]), embedder);
        let outcome = a.match_identity(&black());
        assert_eq!(outcome.identity(), Some("alice"));
        assert!((outcome.distance().unwrap() - 0.25).abs() < 1e-4);
    }

    #[test]
    fn test_match_beyond_threshold_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = QueryEmbedder { query: Some(query_at(0.55)), fail: false };
        let mut a = adapter(dir.path(), Ok(vec![0.9]), embedder);
        let outcome = a.match_identity(&black());
        assert!(outcome.face_detected());
        assert_eq!(outcome.subject(), UNKNOWN_SUBJECT);
        assert_eq!(outcome.confidence(), 0.0);
    }

    #[test]
    fn test_threshold_is_configurable() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = QueryEmbedder { query: Some(query_at(0.35)), fail: false };
        let mut a = adapter(dir.path(), Ok(vec![0.9]), embedder).with_thresholds(0.7, 0.30);
        assert!(!a.match_identity(&black()).is_known());
    }

    #[test]
    fn test_match_without_face() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = QueryEmbedder { query: None, fail: false };
        let mut a = adapter(dir.path(), Ok(vec![0.9]), embedder);
        assert_eq!(a.match_identity(&black()), RecognitionOutcome::no_face());
    }

    #[test]
    fn test_match_fails_soft() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = QueryEmbedder { query: Some(vec![1.0, 0.0]), fail: true };
        let mut a = adapter(dir.path(), Ok(vec![0.9]), embedder);
        assert_eq!(a.match_identity(&black()), RecognitionOutcome::no_face());
    }

    #[test]
    fn test_empty_gallery_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(dir.path()).unwrap();
        let embedder = QueryEmbedder { query: Some(vec![1.0, 0.0]), fail: false };
        let mut a = RecognitionAdapter::new(FixedDetector(Ok(vec![0.9])), embedder, gallery);
        assert_eq!(a.match_identity(&black()), RecognitionOutcome::unknown());
        assert_eq!(a.subject_count().unwrap(), 0);
    }

    #[test]
    fn test_index_from_other_model_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = QueryEmbedder { query: Some(query_at(0.1)), fail: false };
        let mut a = adapter(dir.path(), Ok(vec![0.9]), embedder);

        let stale = vec![GalleryEntry {
            subject: "alice".into(),
            source: "old.jpg".into(),
            embedding: Embedding { values: vec![0.0, 0.0, 1.0] },
        }];
        std::fs::write(dir.path().join(INDEX_FILE), serde_json::to_vec(&stale).unwrap()).unwrap();

        assert_eq!(a.match_identity(&black()).identity(), Some("alice"));
        let raw = std::fs::read(dir.path().join(INDEX_FILE)).unwrap();
        let rebuilt: Vec<GalleryEntry> = serde_json::from_slice(&raw).unwrap();
        assert_eq!(rebuilt[0].embedding.dim(), 2);
    }

    #[test]
    fn test_inconsistent_engine_dimensions_fail() {
        /// References embed in 3 dimensions, frames in 2.
        struct SplitEmbedder;
        impl Embedder for SplitEmbedder {
            fn embed(&mut self, image: &DynamicImage) -> Result<Option<Embedding>, EngineError> {
                let values = if image.to_rgb8().get_pixel(0, 0).0[0] > 128 {
                    vec![1.0, 0.0, 0.0]
                } else {
                    vec![1.0, 0.0]
                };
                Ok(Some(Embedding { values }))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut gallery = Gallery::open(dir.path()).unwrap();
        gallery.register("alice", &white()).unwrap();
        let mut a = RecognitionAdapter::new(FixedDetector(Ok(vec![0.9])), SplitEmbedder, gallery);

        assert!(matches!(
            a.try_match(&black()),
            Err(EngineError::DimensionMismatch { query: 2, gallery: 3 })
        ));
        assert_eq!(a.match_identity(&black()), RecognitionOutcome::no_face());
    }
}
