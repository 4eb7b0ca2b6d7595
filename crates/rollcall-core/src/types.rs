use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Build an L2-normalised embedding. Zero vectors are kept as-is.
    pub fn normalized(raw: Vec<f32>, model_version: Option<String>) -> Self {
        let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.into_iter().map(|x| x / norm).collect()
        } else {
            raw
        };
        Self {
            values,
            model_version,
        }
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    /// Cosine distance in [0, 2]: `1 - similarity`. Lower = more similar.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        1.0 - self.similarity(other)
    }
}

/// A registered face: the embedding of one reference image and the key it is
/// stored under (the student's matriculation number).
#[derive(Debug, Clone)]
pub struct Reference {
    pub key: String,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine distance of the closest gallery entry; `None` for an empty gallery.
    pub distance: Option<f32>,
    /// Key of the accepted reference (only set when `matched`).
    pub key: Option<String>,
}

impl MatchResult {
    pub fn no_match(distance: Option<f32>) -> Self {
        Self {
            matched: false,
            distance,
            key: None,
        }
    }
}

/// Strategy for comparing a probe embedding against the registered gallery.
pub trait Matcher {
    /// Find the closest reference. A match is accepted only when its distance
    /// is strictly below `threshold`.
    fn compare(&self, probe: &Embedding, gallery: &[Reference], threshold: f32) -> MatchResult;
}

/// Nearest neighbour by cosine distance. Ties keep the earliest entry.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[Reference], threshold: f32) -> MatchResult {
        let best = gallery
            .iter()
            .map(|reference| (reference, probe.cosine_distance(&reference.embedding)))
            .fold(None::<(&Reference, f32)>, |best, (reference, distance)| match best {
                Some((_, best_distance)) if best_distance <= distance => best,
                _ => Some((reference, distance)),
            });

        match best {
            Some((reference, distance)) if distance < threshold => MatchResult {
                matched: true,
                distance: Some(distance),
                key: Some(reference.key.clone()),
            },
            Some((_, distance)) => MatchResult::no_match(Some(distance)),
            None => MatchResult::no_match(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding { values: values.to_vec(), model_version: None }
    }

    fn reference(key: &str, values: &[f32]) -> Reference {
        Reference { key: key.into(), embedding: emb(values) }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = emb(&[1.0, 0.0, 0.0]);
        assert!((a.similarity(&a) - 1.0).abs() < 1e-6);
        assert!(a.cosine_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
        assert!((a.cosine_distance(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_opposite() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[-1.0, 0.0]);
        assert!((a.cosine_distance(&b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_normalized_has_unit_length() {
        let e = Embedding::normalized(vec![3.0, 4.0], Some("w600k_r50".into()));
        assert!((e.values[0] - 0.6).abs() < 1e-6);
        assert!((e.values[1] - 0.8).abs() < 1e-6);
        assert_eq!(e.model_version.as_deref(), Some("w600k_r50"));
    }

    #[test]
    fn test_matcher_scans_whole_gallery() {
        // Best match is the last entry.
        let gallery = vec![
            reference("MAT001", &[0.0, 1.0, 0.0]),
            reference("MAT002", &[0.0, 0.0, 1.0]),
            reference("MAT003", &[1.0, 0.0, 0.0]),
        ];
        let result = CosineMatcher.compare(&emb(&[1.0, 0.0, 0.0]), &gallery, 0.4);
        assert!(result.matched);
        assert_eq!(result.key.as_deref(), Some("MAT003"));
        assert!(result.distance.unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_matcher_rejects_above_threshold() {
        let gallery = vec![reference("MAT001", &[0.0, 1.0, 0.0])];
        let result = CosineMatcher.compare(&emb(&[1.0, 0.0, 0.0]), &gallery, 0.4);
        assert!(!result.matched);
        assert!(result.key.is_none());
        assert!((result.distance.unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_matcher_threshold_is_exclusive() {
        // distance == threshold must not be accepted
        let gallery = vec![reference("MAT001", &[0.0, 1.0])];
        let result = CosineMatcher.compare(&emb(&[1.0, 0.0]), &gallery, 1.0);
        assert!(!result.matched);
    }

    #[test]
    fn test_matcher_tie_keeps_first() {
        let gallery = vec![
            reference("MAT001", &[1.0, 0.0]),
            reference("MAT002", &[2.0, 0.0]),
        ];
        let result = CosineMatcher.compare(&emb(&[1.0, 0.0]), &gallery, 0.4);
        assert_eq!(result.key.as_deref(), Some("MAT001"));
    }

    #[test]
    fn test_matcher_empty_gallery() {
        let result = CosineMatcher.compare(&emb(&[1.0, 0.0]), &[], 0.4);
        assert_eq!(result, MatchResult::no_match(None));
    }

    #[test]
    fn test_embedding_serializes() {
        let json = serde_json::to_value(emb(&[0.5])).unwrap();
        assert_eq!(json["values"][0], 0.5);
        assert!(json["model_version"].is_null());
    }
}
