use thiserror::Error;

pub const DEFAULT_PROCESS_EVERY: usize = 3;

#[derive(Error, Debug, PartialEq)]
#[error("process_every must be >= 1, got {0}")]
pub struct ThrottleError(pub usize);

/// Decides which frames run the detection path.
///
/// Frame indices are 1-based: the orchestrator increments its counter
/// before asking, so with `N = 3` frames 3, 6, 9, … are processed and
/// the rest only redisplay the previous annotations.
#[derive(Debug, Clone, Copy)]
pub struct FrameThrottle {
    every: usize,
}

impl FrameThrottle {
    pub fn new(every: usize) -> Result<Self, ThrottleError> {
        if every < 1 {
            return Err(ThrottleError(every));
        }
        Ok(Self { every })
    }

    pub fn should_process(&self, frame_index: u64) -> bool {
        frame_index % self.every as u64 == 0
    }

    pub fn every(&self) -> usize {
        self.every
    }
}

impl Default for FrameThrottle {
    fn default() -> Self {
        Self {
            every: DEFAULT_PROCESS_EVERY,
        }
    }
}
