//! Replays a directory of still images as a video stream.

use rollcall_core::source::{SourceError, VideoSource};
use rollcall_core::Frame;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

/// [`VideoSource`] that yields each image file of a directory once, in file
/// name order, then ends the stream.
pub struct ImageDirSource {
    dir: PathBuf,
    pending: VecDeque<PathBuf>,
    sequence: u32,
}

impl ImageDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pending: VecDeque::new(),
            sequence: 0,
        }
    }

    /// Whether `path` looks like something this source can replay.
    pub fn accepts(path: &Path) -> bool {
        path.is_dir()
    }
}

impl VideoSource for ImageDirSource {
    fn open(&mut self) -> Result<(), SourceError> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| SourceError::Unavailable(format!("{}: {e}", self.dir.display())))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image(p))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(SourceError::Unavailable(format!(
                "{}: no images found",
                self.dir.display()
            )));
        }

        tracing::info!(dir = %self.dir.display(), images = files.len(), "replaying image directory");
        self.pending = files.into();
        self.sequence = 0;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>, SourceError> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };
        self.sequence += 1;

        let image = image::open(&path)
            .map_err(|e| SourceError::Decode(format!("{}: {e}", path.display())))?
            .to_rgb8();
        tracing::trace!(path = %path.display(), sequence = self.sequence, "image frame");
        Ok(Some(Frame::from_image(image, self.sequence)))
    }

    fn release(&mut self) {
        self.pending.clear();
    }
}
