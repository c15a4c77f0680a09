//! rollcall-core: Live attendance pipeline.
//!
//! Matches faces in a video stream against an enrolled roster, signs each
//! identity in at most once per session, draws the live overlay and writes
//! the present/absent report at the end. Face location (SCRFD), embedding
//! (ArcFace) and mask classification run via ONNX Runtime on the CPU.

pub mod alignment;
pub mod annotation;
pub mod detection;
pub mod detector;
pub mod frame;
pub mod ledger;
pub mod mask;
pub mod matcher;
pub mod recognizer;
pub mod record;
pub mod render;
pub mod session;
pub mod source;
pub mod store;
pub mod throttle;
pub mod types;

pub use annotation::{FaceAnnotation, FaceLabel, LabelCategory};
pub use detection::DetectionPath;
pub use detector::{FaceLocator, ScrfdLocator};
pub use frame::{FaceCrop, Frame};
pub use ledger::SigninLedger;
pub use mask::{MaskClassifier, OnnxMaskClassifier};
pub use matcher::{CosineMatcher, Matcher};
pub use recognizer::{ArcFaceEmbedder, FaceEmbedder};
pub use record::{DirectorySink, RecordEmitter, ReportSink, SessionReport};
pub use render::{Caption, FaceTrackRenderer, RenderedFrame};
pub use session::{AttendanceSession, SessionConfig, SessionError, SessionSummary, SigninEvent};
pub use source::{DisplaySurface, SourceError, SurfaceError, VideoSource};
pub use store::{EmbeddingStore, StoreError};
pub use types::{BoundingBox, Embedding, Identity, MatchResult};
