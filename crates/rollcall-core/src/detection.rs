//! Per-frame detection path: locate → mask check → embed → match, then
//! commit the outcomes to the ledger.
//!
//! Analysis touches no shared state, so a frame abandoned mid-way leaves
//! nothing behind. Only [`commit`] writes to the [`SigninLedger`].

use crate::annotation::{FaceAnnotation, FaceLabel};
use crate::detector::{DetectorError, FaceLocator};
use crate::frame::{FaceCrop, Frame};
use crate::ledger::SigninLedger;
use crate::mask::{MaskClassifier, DEFAULT_MASK_THRESHOLD};
use crate::matcher::Matcher;
use crate::recognizer::FaceEmbedder;
use crate::types::{BoundingBox, Identity};
use std::sync::atomic::{AtomicBool, Ordering};

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.6;

/// What the analysis phase concluded about one face.
#[derive(Debug, Clone, PartialEq)]
pub enum FaceOutcome {
    MaskBlocked,
    /// Embedder could not normalise the face, or no roster entry cleared
    /// the threshold.
    Unrecognized,
    Recognized { identity: Identity, similarity: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedFace {
    pub bbox: BoundingBox,
    pub outcome: FaceOutcome,
}

/// Result of applying a frame's outcomes to the ledger.
#[derive(Debug, Default)]
pub struct Committed {
    pub annotations: Vec<FaceAnnotation>,
    /// Identities this frame signed in for the first time, with their score.
    pub fresh: Vec<(Identity, f32)>,
}

/// The external collaborators plus the two policy thresholds.
pub struct DetectionPath {
    locator: Box<dyn FaceLocator>,
    mask: Box<dyn MaskClassifier>,
    embedder: Box<dyn FaceEmbedder>,
    matcher: Box<dyn Matcher>,
    similarity_threshold: f32,
    mask_threshold: f32,
}

impl DetectionPath {
    pub fn new(
        locator: Box<dyn FaceLocator>,
        mask: Box<dyn MaskClassifier>,
        embedder: Box<dyn FaceEmbedder>,
        matcher: Box<dyn Matcher>,
    ) -> Self {
        Self {
            locator,
            mask,
            embedder,
            matcher,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            mask_threshold: DEFAULT_MASK_THRESHOLD,
        }
    }

    pub fn with_thresholds(mut self, similarity: f32, mask: f32) -> Self {
        self.similarity_threshold = similarity;
        self.mask_threshold = mask;
        self
    }

    pub fn embedding_dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Run the analysis phase on one frame.
    ///
    /// Returns `Ok(None)` if `cancelled` was raised between faces; the
    /// partial outcomes are dropped. A locator failure fails the whole frame.
    /// Mask-classifier and embedder failures skip only the face they hit.
    pub fn analyze(
        &mut self,
        frame: &Frame,
        cancelled: &AtomicBool,
    ) -> Result<Option<Vec<AnalyzedFace>>, DetectorError> {
        let boxes = self.locator.locate(frame)?;
        let mut faces = Vec::with_capacity(boxes.len());

        for bbox in boxes {
            if cancelled.load(Ordering::Relaxed) {
                tracing::debug!(sequence = frame.sequence, "analysis abandoned");
                return Ok(None);
            }
            if let Some(outcome) = self.analyze_face(frame, &bbox) {
                faces.push(AnalyzedFace { bbox, outcome });
            }
        }

        Ok(Some(faces))
    }

    /// `None` when the face should not be annotated at all this frame.
    fn analyze_face(&mut self, frame: &Frame, bbox: &BoundingBox) -> Option<FaceOutcome> {
        let crop = FaceCrop::extract(frame, bbox)?;

        match self.mask.classify(&crop.image) {
            Ok(score) if score > self.mask_threshold => {
                tracing::debug!(score, "face is masked; not matching");
                return Some(FaceOutcome::MaskBlocked);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "mask classifier failed; skipping face");
                return None;
            }
        }

        let embedding = match self.embedder.embed(&crop) {
            Ok(Some(embedding)) => embedding,
            Ok(None) => return Some(FaceOutcome::Unrecognized),
            Err(e) => {
                tracing::warn!(error = %e, "embedder failed; skipping face");
                return None;
            }
        };

        match self.matcher.find(&embedding, self.similarity_threshold) {
            Ok(result) => Some(match result.identity {
                Some(identity) => FaceOutcome::Recognized {
                    identity,
                    similarity: result.similarity,
                },
                None => FaceOutcome::Unrecognized,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "matcher rejected embedding; skipping face");
                None
            }
        }
    }
}

/// Apply analysed faces to the ledger and build the frame's annotations.
///
/// Every recognised face is labelled with its identity; the ledger decides
/// whether the sighting is the session's first for that identity.
pub fn commit(faces: Vec<AnalyzedFace>, ledger: &SigninLedger) -> Committed {
    let mut committed = Committed::default();

    for AnalyzedFace { bbox, outcome } in faces {
        let label = match outcome {
            FaceOutcome::MaskBlocked => FaceLabel::MaskBlocked,
            FaceOutcome::Unrecognized => FaceLabel::Unmatched,
            FaceOutcome::Recognized { identity, similarity } => {
                let fresh = ledger.try_mark_present(&identity);
                if fresh {
                    committed.fresh.push((identity.clone(), similarity));
                }
                FaceLabel::Matched {
                    identity,
                    similarity,
                    fresh,
                }
            }
        };
        committed.annotations.push(FaceAnnotation::new(bbox, label));
    }

    committed
}

#[cfg(test)]
pub(crate) mod fakes {
    //! Scripted collaborators shared by the detection and session tests.

    use super::*;
    use crate::mask::MaskError;
    use crate::matcher::MatchError;
    use crate::recognizer::RecognizerError;
    use crate::types::{Embedding, MatchResult};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};

    pub struct FakeLocator {
        pub boxes: Vec<BoundingBox>,
        pub fail: bool,
        pub calls: Arc<AtomicUsize>,
    }

    impl FakeLocator {
        pub fn new(boxes: Vec<BoundingBox>) -> Self {
            Self {
                boxes,
                fail: false,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl FaceLocator for FakeLocator {
        fn locate(&mut self, _frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DetectorError::InferenceFailed("scripted failure".into()));
            }
            Ok(self.boxes.clone())
        }
    }

    /// Returns scripted scores in order, then 0.0. `None` scripts an error.
    pub struct FakeMask {
        pub scores: VecDeque<Option<f32>>,
        pub calls: Arc<AtomicUsize>,
    }

    impl FakeMask {
        pub fn new(scores: impl IntoIterator<Item = Option<f32>>) -> Self {
            Self {
                scores: scores.into_iter().collect(),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn unmasked() -> Self {
            Self::new([])
        }
    }

    impl MaskClassifier for FakeMask {
        fn classify(&mut self, _face: &Frame) -> Result<f32, MaskError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.scores.pop_front() {
                Some(Some(score)) => Ok(score),
                Some(None) => Err(MaskError::InferenceFailed("scripted failure".into())),
                None => Ok(0.0),
            }
        }
    }

    /// Returns scripted embeddings in order, repeating the last one.
    pub struct FakeEmbedder {
        pub dimension: usize,
        pub outputs: VecDeque<Option<Embedding>>,
        pub last: Option<Embedding>,
        pub calls: Arc<AtomicUsize>,
    }

    impl FakeEmbedder {
        pub fn new(dimension: usize, outputs: impl IntoIterator<Item = Option<Embedding>>) -> Self {
            Self {
                dimension,
                outputs: outputs.into_iter().collect(),
                last: None,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl FaceEmbedder for FakeEmbedder {
        fn dimension(&self) -> usize {
            self.dimension
        }

        fn embed(&mut self, _face: &FaceCrop) -> Result<Option<Embedding>, RecognizerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(next) = self.outputs.pop_front() {
                self.last = next;
            }
            Ok(self.last.clone())
        }
    }

    /// Records every probe it sees and answers from an inner matcher.
    pub struct CountingMatcher<M> {
        pub inner: M,
        pub probes: Arc<Mutex<Vec<Embedding>>>,
    }

    impl<M: Matcher> CountingMatcher<M> {
        pub fn new(inner: M) -> Self {
            Self {
                inner,
                probes: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl<M: Matcher> Matcher for CountingMatcher<M> {
        fn find(&self, probe: &Embedding, threshold: f32) -> Result<MatchResult, MatchError> {
            self.probes.lock().unwrap().push(probe.clone());
            self.inner.find(probe, threshold)
        }
    }

    /// A face box with landmarks, inside a 100x100 frame.
    pub fn face_box(x: f32) -> BoundingBox {
        let mut bbox = BoundingBox::new(x, 10.0, 30.0, 30.0);
        bbox.landmarks = Some([
            (x + 8.0, 20.0),
            (x + 22.0, 20.0),
            (x + 15.0, 27.0),
            (x + 10.0, 33.0),
            (x + 20.0, 33.0),
        ]);
        bbox
    }
}
