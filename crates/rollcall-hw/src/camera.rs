//! Camera frames over V4L2, converted to RGB for the pipeline.

use crate::frame::{self, FrameError};
use rollcall_core::source::{SourceError, VideoSource};
use rollcall_core::Frame;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::{Capabilities, Flags as CapFlags};
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::{Format, FourCC};

const STREAM_BUFFERS: u32 = 4;
const MAX_PROBED_NODES: u32 = 16;
const EBUSY: i32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no camera at {0}")]
    DeviceNotFound(String),
    #[error("camera capture error: {0}")]
    CaptureFailed(String),
    #[error("camera is in use by another process")]
    DeviceBusy,
    #[error("camera format rejected: {0}")]
    FormatNegotiationFailed(String),
    #[error("device cannot stream video capture")]
    StreamingNotSupported,
    #[error("no frame within {0} ms")]
    Timeout(u64),
    #[error("frame conversion failed: {0}")]
    Conversion(#[from] FrameError),
}

/// A capture device found by [`Camera::list_devices`].
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel layouts the camera path can convert to RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, chroma shared by pixel pairs).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
    /// 16-bit little-endian grayscale (2 bytes/pixel).
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            _ => None,
        }
    }

    fn to_rgb(self, buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
        match self {
            Self::Yuyv => frame::yuyv_to_rgb(buf, width, height),
            Self::Grey => frame::grey_to_rgb(buf, width, height),
            Self::Y16 => frame::y16_to_rgb(buf, width, height),
        }
    }
}

fn is_capture_device(caps: &Capabilities) -> bool {
    caps.capabilities.contains(CapFlags::VIDEO_CAPTURE)
}

fn open_device(path: &str) -> Result<Device, CameraError> {
    if !Path::new(path).exists() {
        return Err(CameraError::DeviceNotFound(path.to_string()));
    }
    Device::with_path(path).map_err(|e| match e.raw_os_error() {
        Some(EBUSY) => CameraError::DeviceBusy,
        _ => CameraError::DeviceNotFound(format!("{path}: {e}")),
    })
}

/// Request YUYV at `width` x `height` and return what the driver settled on.
/// GREY and Y16 are accepted too, for IR and monochrome sensors.
fn negotiate(device: &Device, width: u32, height: u32) -> Result<(Format, PixelFormat), CameraError> {
    let mut requested = device
        .format()
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("reading current format: {e}")))?;
    requested.fourcc = FourCC::new(b"YUYV");
    requested.width = width;
    requested.height = height;

    let granted = device
        .set_format(&requested)
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("applying {width}x{height} YUYV: {e}")))?;

    match PixelFormat::from_fourcc(granted.fourcc) {
        Some(pixel_format) => Ok((granted, pixel_format)),
        None => Err(CameraError::FormatNegotiationFailed(format!(
            "driver offered {}, expected YUYV, GREY or Y16",
            granted.fourcc
        ))),
    }
}

/// V4L2 camera with one memory-mapped stream for its lifetime.
///
/// The stream holds its own reference to the device handle, so the
/// `Device` itself is not kept.
pub struct Camera {
    stream: MmapStream<'static>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
    timeout_ms: u64,
}

impl Camera {
    /// Open a V4L2 camera (e.g. "/dev/video0"), asking for `width` x `height`.
    ///
    /// The driver may settle on a different size; the negotiated one is
    /// what frames come back in. Each dequeue waits at most `read_timeout`.
    pub fn open(device_path: &str, width: u32, height: u32, read_timeout: Duration) -> Result<Self, CameraError> {
        let device = open_device(device_path)?;
        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("querying {device_path}: {e}")))?;
        if !is_capture_device(&caps) {
            return Err(CameraError::StreamingNotSupported);
        }

        let (format, pixel_format) = negotiate(&device, width, height)?;
        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = format.width,
            height = format.height,
            fourcc = %format.fourcc,
            "camera ready"
        );

        let mut stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("mapping {STREAM_BUFFERS} buffers: {e}")))?;
        stream.set_timeout(read_timeout);

        Ok(Self {
            stream,
            width: format.width,
            height: format.height,
            device_path: device_path.to_string(),
            pixel_format,
            timeout_ms: read_timeout.as_millis() as u64,
        })
    }

    /// Dequeue the next frame and convert it to RGB.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self.stream.next().map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                CameraError::Timeout(self.timeout_ms)
            } else {
                CameraError::CaptureFailed(format!("dequeue: {e}"))
            }
        })?;

        let rgb = self.pixel_format.to_rgb(buf, self.width, self.height)?;
        Ok(Frame::new(rgb, self.width, self.height, meta.sequence))
    }

    /// Capture-capable devices among `/dev/video0` to `/dev/video{MAX_PROBED_NODES - 1}`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..MAX_PROBED_NODES)
            .filter_map(|i| probe(format!("/dev/video{i}")))
            .collect()
    }
}

fn probe(path: String) -> Option<DeviceInfo> {
    if !Path::new(&path).exists() {
        return None;
    }
    let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
    is_capture_device(&caps).then(|| DeviceInfo {
        path,
        name: caps.card,
        driver: caps.driver,
        bus: caps.bus,
    })
}

/// Settings for a [`CameraSource`].
#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub read_timeout: Duration,
    /// Frames discarded after opening while auto-exposure settles.
    pub warmup_frames: u32,
}

/// [`VideoSource`] backed by a V4L2 camera. A camera never ends its stream.
pub struct CameraSource {
    settings: CameraSettings,
    camera: Option<Camera>,
}

impl CameraSource {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            camera: None,
        }
    }
}

impl From<CameraError> for SourceError {
    fn from(e: CameraError) -> Self {
        match e {
            CameraError::Timeout(ms) => SourceError::Timeout(ms),
            CameraError::Conversion(e) => SourceError::Decode(e.to_string()),
            CameraError::CaptureFailed(msg) => SourceError::Decode(msg),
            other => SourceError::Unavailable(other.to_string()),
        }
    }
}

impl VideoSource for CameraSource {
    fn open(&mut self) -> Result<(), SourceError> {
        let s = &self.settings;
        let mut camera = Camera::open(&s.device, s.width, s.height, s.read_timeout)?;

        for _ in 0..s.warmup_frames {
            if let Err(e) = camera.capture_frame() {
                tracing::debug!(error = %e, "warm-up frame failed");
            }
        }
        tracing::debug!(frames = s.warmup_frames, "camera warm-up done");

        self.camera = Some(camera);
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>, SourceError> {
        let camera = self
            .camera
            .as_mut()
            .ok_or_else(|| SourceError::Unavailable("camera not opened".into()))?;
        Ok(Some(camera.capture_frame()?))
    }

    fn release(&mut self) {
        if let Some(camera) = self.camera.take() {
            tracing::info!(device = %camera.device_path, "camera released");
        }
    }
}
