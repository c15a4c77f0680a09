//! Headless display surface: periodic JPEG preview plus the shared stop flag.

use image::ImageFormat;
use rollcall_core::source::{DisplaySurface, SurfaceError};
use rollcall_core::RenderedFrame;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Writes every `every`-th rendered frame to `path` (if set) and reports a
/// stop request once `stop` is raised. Captions are logged, not typeset.
pub struct PreviewSurface {
    path: Option<PathBuf>,
    every: u32,
    presented: u64,
    last_captions: Vec<String>,
    stop: Arc<AtomicBool>,
}

impl PreviewSurface {
    pub fn new(path: Option<PathBuf>, every: u32, stop: Arc<AtomicBool>) -> Self {
        Self {
            path,
            every: every.max(1),
            presented: 0,
            last_captions: Vec::new(),
            stop,
        }
    }

    fn write_preview(&self, rendered: &RenderedFrame) -> Result<(), SurfaceError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let image = rendered
            .frame
            .to_image()
            .ok_or_else(|| SurfaceError::Present("frame buffer has inconsistent size".into()))?;

        // Write beside the target and rename, so viewers never read a torn JPEG.
        let tmp = path.with_extension("tmp.jpg");
        image
            .save_with_format(&tmp, ImageFormat::Jpeg)
            .map_err(|e| SurfaceError::Present(format!("{}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl DisplaySurface for PreviewSurface {
    fn present(&mut self, rendered: &RenderedFrame) -> Result<(), SurfaceError> {
        self.presented += 1;

        let captions: Vec<String> = rendered.captions.iter().map(|c| c.text.clone()).collect();
        if captions != self.last_captions {
            tracing::debug!(?captions, "overlay changed");
            self.last_captions = captions;
        }

        if self.presented % self.every as u64 == 0 {
            self.write_preview(rendered)?;
        }
        Ok(())
    }

    fn termination_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn release(&mut self) {
        tracing::debug!(frames = self.presented, "preview surface released");
    }
}
