use crate::config::Config;
use crossbeam_channel::{Receiver, Sender};
use rollcall_core::detector::DetectorError;
use rollcall_core::mask::MaskError;
use rollcall_core::recognizer::RecognizerError;
use rollcall_core::session::{SessionError, SessionSummary, SigninEvent};
use rollcall_core::{
    ArcFaceEmbedder, AttendanceSession, CosineMatcher, DetectionPath, DisplaySurface, EmbeddingStore,
    OnnxMaskClassifier, ReportSink, ScrfdLocator, StoreError, VideoSource,
};
use rollcall_hw::{CameraSource, ImageDirSource};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("roster error: {0}")]
    Store(#[from] StoreError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("mask classifier error: {0}")]
    Mask(#[from] MaskError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to spawn {0} thread: {1}")]
    Spawn(&'static str, #[source] std::io::Error),
    #[error("session thread panicked")]
    Panicked,
}

/// Which kind of [`VideoSource`] a configured source string names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Camera,
    ImageDir,
}

impl SourceKind {
    /// A directory replays its images; anything else is a V4L2 device path.
    pub fn of(source: &str) -> Self {
        if ImageDirSource::accepts(Path::new(source)) {
            Self::ImageDir
        } else {
            Self::Camera
        }
    }
}

pub fn open_source(config: &Config) -> Box<dyn VideoSource> {
    match SourceKind::of(&config.source) {
        SourceKind::ImageDir => Box::new(ImageDirSource::new(&config.source)),
        SourceKind::Camera => Box::new(CameraSource::new(config.camera_settings())),
    }
}

/// Load the roster and all three models, and wire up a session.
///
/// Fails fast: a missing roster or model file is a startup error.
pub fn build_session(
    config: &Config,
    stop: Arc<AtomicBool>,
    events: Sender<SigninEvent>,
) -> Result<AttendanceSession, EngineError> {
    let store = Arc::new(EmbeddingStore::load(&config.roster_path)?);

    let locator = ScrfdLocator::load(&config.scrfd_model_path())?;
    tracing::info!(path = %config.scrfd_model_path().display(), "SCRFD locator loaded");

    let embedder = ArcFaceEmbedder::load(&config.arcface_model_path())?;
    tracing::info!(path = %config.arcface_model_path().display(), "ArcFace embedder loaded");

    let mask = OnnxMaskClassifier::load(&config.mask_model_path())?;
    tracing::info!(path = %config.mask_model_path().display(), "mask classifier loaded");

    let detection = DetectionPath::new(
        Box::new(locator),
        Box::new(mask),
        Box::new(embedder),
        Box::new(CosineMatcher::new(Arc::clone(&store))),
    );

    Ok(AttendanceSession::new(config.session_config(), store, detection)?
        .with_events(events)
        .with_stop_flag(stop))
}

/// Run the session on a dedicated OS thread.
///
/// The source is opened on that thread; an unopenable source comes back
/// through the join handle as [`SessionError::SourceUnavailable`].
pub fn spawn_session(
    mut session: AttendanceSession,
    mut source: Box<dyn VideoSource>,
    mut surface: Box<dyn DisplaySurface>,
    sink: Box<dyn ReportSink + Send>,
) -> Result<JoinHandle<Result<SessionSummary, SessionError>>, EngineError> {
    std::thread::Builder::new()
        .name("rollcall-session".into())
        .spawn(move || {
            tracing::info!(session = %session.id(), "session thread started");
            let result = session.run(source.as_mut(), surface.as_mut(), sink.as_ref());
            tracing::info!("session thread exiting");
            result
        })
        .map_err(|e| EngineError::Spawn("session", e))
}

/// Wait for the session thread and surface its outcome.
pub fn join_session(handle: JoinHandle<Result<SessionSummary, SessionError>>) -> Result<SessionSummary, EngineError> {
    let result = handle.join().map_err(|_| EngineError::Panicked)?;
    Ok(result?)
}

/// Print each fresh sign-in as it arrives. Ends once every sender is gone.
pub fn spawn_notifier(events: Receiver<SigninEvent>) -> Result<JoinHandle<usize>, EngineError> {
    std::thread::Builder::new()
        .name("rollcall-notify".into())
        .spawn(move || {
            let mut count = 0;
            for event in events {
                println!("{}", signin_line(&event));
                count += 1;
            }
            count
        })
        .map_err(|e| EngineError::Spawn("notifier", e))
}

fn signin_line(event: &SigninEvent) -> String {
    format!(
        "[{}] {} signed in",
        event.at.format("%Y-%m-%d %H:%M:%S"),
        event.identity
    )
}
