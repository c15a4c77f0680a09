//! Attendance session: the frame loop that ties source, detection path,
//! ledger, renderer, surface and report together.
//!
//! ```text
//! Idle ──start──▶ Running ──end of stream / stop / too many errors──▶ Draining ──▶ Stopped
//! ```
//!
//! `Idle → Running` fails with [`SessionError::SourceUnavailable`] when the
//! source cannot be opened. `Stopped` closes the ledger and emits the report.

use crate::annotation::FaceAnnotation;
use crate::detection::{self, DetectionPath, DEFAULT_SIMILARITY_THRESHOLD};
use crate::frame::Frame;
use crate::ledger::SigninLedger;
use crate::mask::DEFAULT_MASK_THRESHOLD;
use crate::record::{RecordEmitter, ReportSink};
use crate::render::{Banner, FaceTrackRenderer, DEFAULT_BANNER_TTL};
use crate::source::{DisplaySurface, SourceError, VideoSource};
use crate::store::EmbeddingStore;
use crate::throttle::{FrameThrottle, ThrottleError, DEFAULT_PROCESS_EVERY};
use crate::types::Identity;
use chrono::{DateTime, Local};
use crossbeam_channel::Sender;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_MAX_SOURCE_ERRORS: u32 = 5;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("video source unavailable: {0}")]
    SourceUnavailable(#[source] SourceError),
    #[error("embedder produces {embedder}-dimensional embeddings but the roster holds {roster}-dimensional ones")]
    DimensionMismatch { embedder: usize, roster: usize },
    #[error(transparent)]
    Throttle(#[from] ThrottleError),
    #[error("session already started")]
    AlreadyStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Run detection on every Nth frame.
    pub process_every: usize,
    pub similarity_threshold: f32,
    /// Mask score above which a face is not matched.
    pub mask_threshold: f32,
    pub banner_ttl: Duration,
    /// Consecutive read errors tolerated before the session drains.
    pub max_source_errors: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            process_every: DEFAULT_PROCESS_EVERY,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            mask_threshold: DEFAULT_MASK_THRESHOLD,
            banner_ttl: DEFAULT_BANNER_TTL,
            max_source_errors: DEFAULT_MAX_SOURCE_ERRORS,
        }
    }
}

/// Emitted once per identity, on the session's first sighting.
#[derive(Debug, Clone, PartialEq)]
pub struct SigninEvent {
    pub identity: Identity,
    pub similarity: f32,
    pub at: DateTime<Local>,
}

/// What a finished session did.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub frames_read: u64,
    pub frames_processed: u64,
    pub present: BTreeSet<Identity>,
    /// Where the report went; `None` if nobody signed in or the write failed.
    pub report: Option<PathBuf>,
}

/// Why the running loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainReason {
    EndOfStream,
    StopRequested,
    SourceFailed,
}

/// One attendance-taking run.
pub struct AttendanceSession {
    id: Uuid,
    state: SessionState,
    store: Arc<EmbeddingStore>,
    ledger: Arc<SigninLedger>,
    detection: DetectionPath,
    throttle: FrameThrottle,
    renderer: FaceTrackRenderer,
    config: SessionConfig,
    /// Last processed frame's faces, redrawn on skipped frames.
    annotations: Vec<FaceAnnotation>,
    banner: Option<Banner>,
    events: Option<Sender<SigninEvent>>,
    cancelled: Arc<AtomicBool>,
    frames_read: u64,
    frames_processed: u64,
}

impl AttendanceSession {
    /// Wire up a session. Fails when the embedder and roster disagree on
    /// dimensionality, since no probe could ever be compared.
    pub fn new(
        config: SessionConfig,
        store: Arc<EmbeddingStore>,
        detection: DetectionPath,
    ) -> Result<Self, SessionError> {
        let embedder = detection.embedding_dimension();
        if embedder != store.dimension() {
            return Err(SessionError::DimensionMismatch {
                embedder,
                roster: store.dimension(),
            });
        }

        let throttle = FrameThrottle::new(config.process_every)?;
        let detection = detection.with_thresholds(config.similarity_threshold, config.mask_threshold);

        Ok(Self {
            id: Uuid::new_v4(),
            state: SessionState::Idle,
            store,
            ledger: Arc::new(SigninLedger::new()),
            detection,
            throttle,
            renderer: FaceTrackRenderer::new(),
            config,
            annotations: Vec::new(),
            banner: None,
            events: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            frames_read: 0,
            frames_processed: 0,
        })
    }

    /// Send a [`SigninEvent`] per fresh sign-in to `tx`.
    pub fn with_events(mut self, tx: Sender<SigninEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Share a stop flag with whoever watches for the user's stop request.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn ledger(&self) -> Arc<SigninLedger> {
        Arc::clone(&self.ledger)
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    /// Run the session to completion.
    ///
    /// Only a failed start is an error. Once running, every frame and face
    /// level failure is logged and absorbed, and a failed report write is
    /// logged with `report: None` in the summary.
    pub fn run(
        &mut self,
        source: &mut dyn VideoSource,
        surface: &mut dyn DisplaySurface,
        sink: &dyn ReportSink,
    ) -> Result<SessionSummary, SessionError> {
        let span = tracing::info_span!("session", id = %self.id);
        let _guard = span.enter();

        if self.state != SessionState::Idle {
            return Err(SessionError::AlreadyStarted);
        }

        if let Err(e) = source.open() {
            tracing::error!(error = %e, "cannot open video source");
            surface.release();
            return Err(SessionError::SourceUnavailable(e));
        }

        self.transition(SessionState::Running);
        tracing::info!(
            known = self.store.known_identities().len(),
            process_every = self.throttle.every(),
            threshold = self.config.similarity_threshold,
            "attendance session started"
        );

        let reason = self.run_frames(source, surface);
        tracing::info!(?reason, frames = self.frames_read, "session draining");

        self.transition(SessionState::Draining);
        source.release();
        surface.release();

        self.transition(SessionState::Stopped);
        let present = self.ledger.close();
        let report = match RecordEmitter::emit(&present, self.store.known_identities(), sink) {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(error = %e, "report write failed; attendance data not persisted");
                None
            }
        };

        Ok(SessionSummary {
            session_id: self.id,
            frames_read: self.frames_read,
            frames_processed: self.frames_processed,
            present,
            report,
        })
    }

    fn stop_requested(&self, surface: &dyn DisplaySurface) -> bool {
        self.cancelled.load(Ordering::Relaxed) || surface.termination_requested()
    }

    fn run_frames(&mut self, source: &mut dyn VideoSource, surface: &mut dyn DisplaySurface) -> DrainReason {
        let mut consecutive_errors = 0u32;

        loop {
            let frame = match source.read() {
                Ok(Some(frame)) => {
                    consecutive_errors = 0;
                    frame
                }
                Ok(None) => return DrainReason::EndOfStream,
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::warn!(error = %e, consecutive_errors, "frame read failed");
                    if consecutive_errors > self.config.max_source_errors {
                        tracing::error!(
                            limit = self.config.max_source_errors,
                            "too many consecutive source errors"
                        );
                        return DrainReason::SourceFailed;
                    }
                    if self.stop_requested(surface) {
                        return DrainReason::StopRequested;
                    }
                    continue;
                }
            };

            self.frames_read += 1;
            if self.throttle.should_process(self.frames_read) {
                self.frames_processed += 1;
                self.process(&frame);
            }

            let rendered = self
                .renderer
                .render(&frame, &self.annotations, self.banner.as_ref(), Instant::now());
            if let Err(e) = surface.present(&rendered) {
                tracing::warn!(error = %e, "display surface rejected frame");
            }

            if self.stop_requested(surface) {
                return DrainReason::StopRequested;
            }
        }
    }

    /// Detection path for one frame. Leaves the previous annotations in place
    /// if the locator fails or a stop arrives mid-analysis.
    fn process(&mut self, frame: &Frame) {
        let faces = match self.detection.analyze(frame, &self.cancelled) {
            Ok(Some(faces)) => faces,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, sequence = frame.sequence, "face locator failed; frame skipped");
                return;
            }
        };

        let committed = detection::commit(faces, &self.ledger);
        for (identity, similarity) in committed.fresh {
            tracing::info!(%identity, similarity, "signed in");
            self.banner = Some(Banner::signed_in(&identity, Instant::now(), self.config.banner_ttl));
            self.notify(SigninEvent {
                identity,
                similarity,
                at: Local::now(),
            });
        }
        self.annotations = committed.annotations;
    }

    fn notify(&self, event: SigninEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                tracing::debug!("sign-in event receiver gone");
            }
        }
    }
}
