//! rollcall-hw: Video sources for the attendance pipeline.
//!
//! Provides V4L2-based camera capture (converted to RGB) and an
//! image-directory source that replays still frames.

pub mod camera;
pub mod frame;
pub mod image_dir;

pub use camera::{Camera, CameraError, CameraSettings, CameraSource, DeviceInfo, PixelFormat};
pub use image_dir::ImageDirSource;
