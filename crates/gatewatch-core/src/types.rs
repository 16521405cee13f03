use serde::{Deserialize, Serialize};

/// Subject name reported for faces that match no gallery entry.
pub const UNKNOWN_SUBJECT: &str = "Unknown";

/// A face found by the presence filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceCandidate {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub width: f32,
    #[serde(default)]
    pub height: f32,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
}

/// Face embedding vector produced by the recognition engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Vectors of different dimension come from different models and are not
    /// comparable; they score 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        if self.dim() != other.dim() {
            return 0.0;
        }
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Cosine distance in [0, 2]. Lower = more similar.
    pub fn cosine_distance(&self, other: &Embedding) -> f64 {
        1.0 - f64::from(self.similarity(other))
    }
}

/// One embedded reference image from a subject's gallery folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub subject: String,
    /// File name of the reference image inside the subject folder.
    pub source: String,
    pub embedding: Embedding,
}

/// Nearest gallery entry for a query embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub subject: String,
    pub distance: f64,
}

/// Strategy for finding the closest gallery entry to a query embedding.
pub trait Matcher {
    /// Returns `None` when no gallery entry has the query's dimension,
    /// including when the gallery is empty.
    fn nearest(&self, query: &Embedding, gallery: &[GalleryEntry]) -> Option<MatchResult>;
}

/// Cosine-distance matcher. Always walks the whole gallery.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn nearest(&self, query: &Embedding, gallery: &[GalleryEntry]) -> Option<MatchResult> {
        let mut best: Option<(usize, f64)> = None;

        for (i, entry) in gallery.iter().enumerate() {
            if entry.embedding.dim() != query.dim() {
                continue;
            }
            let distance = query.cosine_distance(&entry.embedding);
            let is_better = match best {
                None => true,
                Some((_, d)) => distance < d,
            };
            if is_better {
                best = Some((i, distance));
            }
        }

        best.map(|(idx, distance)| MatchResult {
            subject: gallery[idx].subject.clone(),
            distance,
        })
    }
}

/// What the recognition adapter concluded about a single frame.
///
/// `identity` and `distance` are only ever set together; build values through
/// the constructors so that holds.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionOutcome {
    face_detected: bool,
    identity: Option<String>,
    distance: Option<f64>,
}

impl RecognitionOutcome {
    /// No usable face in the frame (also the fail-soft default).
    pub fn no_face() -> Self {
        Self {
            face_detected: false,
            identity: None,
            distance: None,
        }
    }

    /// A face was seen but no gallery subject is close enough.
    pub fn unknown() -> Self {
        Self {
            face_detected: true,
            identity: None,
            distance: None,
        }
    }

    /// A face matched `subject` at `distance`.
    pub fn known(subject: impl Into<String>, distance: f64) -> Self {
        Self {
            face_detected: true,
            identity: Some(subject.into()),
            distance: Some(distance),
        }
    }

    pub fn face_detected(&self) -> bool {
        self.face_detected
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn distance(&self) -> Option<f64> {
        self.distance
    }

    pub fn is_known(&self) -> bool {
        self.identity.is_some()
    }

    /// Subject name, or [`UNKNOWN_SUBJECT`].
    pub fn subject(&self) -> &str {
        self.identity.as_deref().unwrap_or(UNKNOWN_SUBJECT)
    }

    /// Match confidence as a percentage: `(1 - distance) * 100`, floored at 0.
    /// Always 0 for unknown subjects.
    pub fn confidence(&self) -> f64 {
        match (&self.identity, self.distance) {
            (Some(_), Some(d)) => ((1.0 - d) * 100.0).max(0.0),
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(subject: &str, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            subject: subject.into(),
            source: format!("{subject}.jpg"),
            embedding: Embedding { values },
        }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Embedding { values: vec![1.0, 0.0, 0.0] };
        let b = Embedding { values: vec![1.0, 0.0, 0.0] };
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
        assert!(a.cosine_distance(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_orthogonal() {
        let a = Embedding { values: vec![1.0, 0.0] };
        let b = Embedding { values: vec![0.0, 1.0] };
        assert!((a.cosine_distance(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Embedding { values: vec![0.0, 0.0] };
        let b = Embedding { values: vec![1.0, 0.0] };
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_mismatched_dimensions_are_not_comparable() {
        let a = Embedding { values: vec![1.0, 0.0] };
        let b = Embedding { values: vec![1.0, 0.0, 0.0] };
        assert_eq!(a.similarity(&b), 0.0);
        assert!((a.cosine_distance(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_matcher_skips_other_dimensions() {
        let query = Embedding { values: vec![1.0, 0.0] };
        let gallery = vec![
            entry("stale", vec![1.0, 0.0, 0.0]),
            entry("bob", vec![0.6, 0.8]),
        ];
        assert_eq!(CosineMatcher.nearest(&query, &gallery).unwrap().subject, "bob");
        assert!(CosineMatcher.nearest(&query, &gallery[..1]).is_none());
    }

    #[test]
    fn test_matcher_walks_whole_gallery() {
        // Best match is the last entry
        let query = Embedding { values: vec![1.0, 0.0, 0.0] };
        let gallery = vec![
            entry("bob", vec![0.0, 1.0, 0.0]),
            entry("carol", vec![0.0, 0.0, 1.0]),
            entry("alice", vec![1.0, 0.0, 0.0]),
        ];

        let result = CosineMatcher.nearest(&query, &gallery).unwrap();
        assert_eq!(result.subject, "alice");
        assert!(result.distance.abs() < 1e-6);
    }

    #[test]
    fn test_matcher_empty_gallery() {
        let query = Embedding { values: vec![1.0, 0.0] };
        assert!(CosineMatcher.nearest(&query, &[]).is_none());
    }

    #[test]
    fn test_outcome_known_confidence() {
        let outcome = RecognitionOutcome::known("alice", 0.25);
        assert_eq!(outcome.subject(), "alice");
        assert!((outcome.confidence() - 75.0).abs() < 1e-9);
        assert_eq!(outcome.distance(), Some(0.25));
    }

    #[test]
    fn test_outcome_confidence_floored() {
        let outcome = RecognitionOutcome::known("alice", 1.4);
        assert_eq!(outcome.confidence(), 0.0);
    }

    #[test]
    fn test_outcome_unknown() {
        let outcome = RecognitionOutcome::unknown();
        assert!(outcome.face_detected());
        assert!(!outcome.is_known());
        assert_eq!(outcome.subject(), UNKNOWN_SUBJECT);
        assert_eq!(outcome.distance(), None);
        assert_eq!(outcome.confidence(), 0.0);
    }

    #[test]
    fn test_outcome_no_face() {
        let outcome = RecognitionOutcome::no_face();
        assert!(!outcome.face_detected());
        assert_eq!(outcome.subject(), UNKNOWN_SUBJECT);
    }
}
