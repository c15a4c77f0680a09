use crate::types::{BoundingBox, Identity};

pub const LABEL_UNMATCHED: &str = "recognition failed";
pub const LABEL_MASK_BLOCKED: &str = "remove mask";
pub const CHECKED_IN_SUFFIX: &str = " (checked in)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelCategory {
    Matched,
    Unmatched,
    MaskBlocked,
}

/// Outcome of the detection path for one face.
#[derive(Debug, Clone, PartialEq)]
pub enum FaceLabel {
    Matched {
        identity: Identity,
        similarity: f32,
        /// This sighting performed the session's sign-in for `identity`.
        fresh: bool,
    },
    Unmatched,
    MaskBlocked,
}

/// One face drawn on screen until the next processed frame replaces it.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceAnnotation {
    pub bbox: BoundingBox,
    pub label: FaceLabel,
}

impl FaceAnnotation {
    pub fn new(bbox: BoundingBox, label: FaceLabel) -> Self {
        Self { bbox, label }
    }

    pub fn category(&self) -> LabelCategory {
        match self.label {
            FaceLabel::Matched { .. } => LabelCategory::Matched,
            FaceLabel::Unmatched => LabelCategory::Unmatched,
            FaceLabel::MaskBlocked => LabelCategory::MaskBlocked,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match &self.label {
            FaceLabel::Matched { identity, .. } => Some(identity),
            _ => None,
        }
    }

    /// Text shown next to the box.
    pub fn display_label(&self) -> String {
        match &self.label {
            FaceLabel::Matched {
                identity, fresh: true, ..
            } => identity.to_string(),
            FaceLabel::Matched { identity, .. } => format!("{identity}{CHECKED_IN_SUFFIX}"),
            FaceLabel::Unmatched => LABEL_UNMATCHED.to_string(),
            FaceLabel::MaskBlocked => LABEL_MASK_BLOCKED.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox() -> BoundingBox {
        BoundingBox::new(0.0, 0.0, 10.0, 10.0)
    }

    #[test]
    fn test_labels_per_category() {
        let fresh = FaceAnnotation::new(
            bbox(),
            FaceLabel::Matched {
                identity: "Alice".into(),
                similarity: 0.9,
                fresh: true,
            },
        );
        let repeat = FaceAnnotation::new(
            bbox(),
            FaceLabel::Matched {
                identity: "Alice".into(),
                similarity: 0.9,
                fresh: false,
            },
        );
        let unmatched = FaceAnnotation::new(bbox(), FaceLabel::Unmatched);
        let masked = FaceAnnotation::new(bbox(), FaceLabel::MaskBlocked);

        assert_eq!(fresh.display_label(), "Alice");
        assert_eq!(repeat.display_label(), "Alice (checked in)");
        assert_eq!(unmatched.display_label(), "recognition failed");
        assert_eq!(masked.display_label(), "remove mask");

        assert_eq!(fresh.category(), LabelCategory::Matched);
        assert_eq!(unmatched.category(), LabelCategory::Unmatched);
        assert_eq!(masked.category(), LabelCategory::MaskBlocked);
    }

    #[test]
    fn test_identity_only_for_matched() {
        let masked = FaceAnnotation::new(bbox(), FaceLabel::MaskBlocked);
        assert!(masked.identity().is_none());

        let matched = FaceAnnotation::new(
            bbox(),
            FaceLabel::Matched {
                identity: "recognition failed".into(),
                similarity: 0.7,
                fresh: true,
            },
        );
        // An identity that happens to spell a status string is still a match.
        assert_eq!(matched.category(), LabelCategory::Matched);
        assert_eq!(matched.identity().map(Identity::as_str), Some("recognition failed"));
    }
}
