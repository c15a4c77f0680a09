//! Frame producer and frame consumer seams of the attendance session.

use crate::frame::Frame;
use crate::render::RenderedFrame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("video source unavailable: {0}")]
    Unavailable(String),
    #[error("timed out waiting for a frame after {0} ms")]
    Timeout(u64),
    #[error("frame could not be decoded: {0}")]
    Decode(String),
}

/// Abstract frame producer (camera, image directory, test fake).
pub trait VideoSource: Send {
    /// Acquire the device. A failure here is fatal for the session.
    fn open(&mut self) -> Result<(), SourceError>;

    /// Next frame, or `Ok(None)` at end of stream. Blocks for at most the
    /// source's own read timeout.
    fn read(&mut self) -> Result<Option<Frame>, SourceError>;

    fn release(&mut self);
}

#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("failed to present frame: {0}")]
    Present(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract frame consumer that also carries the user's stop request.
pub trait DisplaySurface: Send {
    fn present(&mut self, rendered: &RenderedFrame) -> Result<(), SurfaceError>;

    /// The user asked to end the session.
    fn termination_requested(&self) -> bool;

    fn release(&mut self);
}
