use std::fmt;

/// Opaque identity label from the roster (e.g. a student's name).
///
/// Equality is exact string equality; ordering is lexicographic, which is
/// the order reports list identities in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

impl From<String> for Identity {
    fn from(label: String) -> Self {
        Self(label)
    }
}

/// Bounding box for a located face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Integer pixel rectangle, already clamped to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// A box without landmarks, mostly useful for fakes and tests.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 1.0,
            landmarks: None,
        }
    }

    /// Clamp the box to a `frame_width` x `frame_height` frame.
    ///
    /// Returns `None` when nothing of the box survives clamping (zero width or
    /// height, or entirely off-frame). Detectors emit such boxes now and then
    /// on flickering frames.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Option<PixelRect> {
        if !(self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()) {
            return None;
        }

        let x1 = (self.x.floor().max(0.0) as u32).min(frame_width);
        let y1 = (self.y.floor().max(0.0) as u32).min(frame_height);
        let x2 = ((self.x + self.width).floor().max(0.0) as u32).min(frame_width);
        let y2 = ((self.y + self.height).floor().max(0.0) as u32).min(frame_height);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        Some(PixelRect {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        })
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. Defined as 0.0 when
    /// either vector has zero norm. Callers compare equal-length vectors only;
    /// [`Matcher`](crate::matcher::Matcher) enforces that before scanning.
    ///
    /// Sums run in f64: squaring any finite f32 stays finite and non-zero
    /// there, so very large or very small embeddings still compare correctly.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;

        for (&a, &b) in self.values.iter().zip(other.values.iter()) {
            let (a, b) = (f64::from(a), f64::from(b));
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            (dot / denom).clamp(-1.0, 1.0) as f32
        } else {
            0.0
        }
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// One enrolled photo of one person. A person may have several entries.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub identity: Identity,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against the roster.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Identity of the best entry, set only when it cleared the threshold.
    pub identity: Option<Identity>,
    /// Cosine similarity of the best entry [-1, 1], 0.0 when nothing was scanned.
    pub similarity: f32,
}

impl MatchResult {
    pub fn unmatched(similarity: f32) -> Self {
        Self {
            identity: None,
            similarity,
        }
    }

    pub fn is_match(&self) -> bool {
        self.identity.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Embedding::new(vec![0.3, -1.2, 4.0]);
        assert!((a.similarity(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_scale_invariant() {
        let a = Embedding::new(vec![1.0, 2.0, 3.0]);
        let b = Embedding::new(vec![2.0, 4.0, 6.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![-1.0, 0.0]);
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_tiny_magnitudes() {
        let a = Embedding::new(vec![1e-25, 2e-25, 0.0]);
        assert!((a.similarity(&a) - 1.0).abs() < 1e-6);
        let b = Embedding::new(vec![2e-25, 4e-25, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_huge_magnitudes() {
        let a = Embedding::new(vec![1e20, 2e20, 0.0]);
        let sim = a.similarity(&a);
        assert!(!sim.is_nan());
        assert!((sim - 1.0).abs() < 1e-6);

        let max = Embedding::new(vec![f32::MAX, -f32::MAX]);
        assert!((max.similarity(&max) - 1.0).abs() < 1e-6);
        let flipped = Embedding::new(vec![-f32::MAX, f32::MAX]);
        assert!((max.similarity(&flipped) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_mixed_magnitudes() {
        let huge = Embedding::new(vec![3e19, 0.0, 0.0]);
        let unit = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((huge.similarity(&unit) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector_is_exactly_zero() {
        let zero = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(zero.similarity(&b), 0.0);
        assert_eq!(b.similarity(&zero), 0.0);
        assert_eq!(zero.similarity(&zero), 0.0);
    }

    #[test]
    fn test_clamp_inside_frame() {
        let bbox = BoundingBox::new(10.4, 20.9, 30.0, 40.0);
        let rect = bbox.clamp_to(100, 100).unwrap();
        assert_eq!(
            rect,
            PixelRect {
                x: 10,
                y: 20,
                width: 30,
                height: 40
            }
        );
    }

    #[test]
    fn test_clamp_partially_outside() {
        let bbox = BoundingBox::new(-15.0, 80.0, 40.0, 50.0);
        let rect = bbox.clamp_to(100, 100).unwrap();
        assert_eq!(rect.x, 0);
        assert_eq!(rect.width, 25);
        assert_eq!(rect.y, 80);
        assert_eq!(rect.height, 20);
    }

    #[test]
    fn test_clamp_degenerate_box() {
        assert!(BoundingBox::new(10.0, 10.0, 0.0, 20.0).clamp_to(100, 100).is_none());
        assert!(BoundingBox::new(10.0, 10.0, 20.0, 0.4).clamp_to(100, 100).is_none());
    }

    #[test]
    fn test_clamp_off_frame() {
        assert!(BoundingBox::new(150.0, 10.0, 20.0, 20.0).clamp_to(100, 100).is_none());
        assert!(BoundingBox::new(-50.0, -50.0, 20.0, 20.0).clamp_to(100, 100).is_none());
    }

    #[test]
    fn test_clamp_non_finite() {
        assert!(BoundingBox::new(f32::NAN, 10.0, 20.0, 20.0).clamp_to(100, 100).is_none());
    }

    #[test]
    fn test_identity_ordering_is_lexicographic() {
        let mut ids = vec![Identity::from("Carol"), Identity::from("Alice"), Identity::from("Bob")];
        ids.sort();
        let names: Vec<&str> = ids.iter().map(Identity::as_str).collect();
        assert_eq!(names, ["Alice", "Bob", "Carol"]);
    }
}
