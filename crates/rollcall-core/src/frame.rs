//! RGB frame type shared by video sources, the detection path and the renderer.

use crate::types::{BoundingBox, PixelRect};
use image::RgbImage;
use std::time::Instant;

/// A captured frame: packed RGB8 pixels in row-major order.
#[derive(Clone, Debug)]
pub struct Frame {
    /// RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        debug_assert_eq!(
            data.len(),
            width as usize * height as usize * 3,
            "data length must equal width * height * 3"
        );
        Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
            sequence,
        }
    }

    /// A frame filled with one colour.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], sequence: u32) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self::new(data, width, height, sequence)
    }

    pub fn from_image(image: RgbImage, sequence: u32) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, sequence)
    }

    /// Copy the pixels into an [`RgbImage`] for resizing or encoding.
    pub fn to_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }

    /// Set a pixel; coordinates outside the frame are ignored.
    pub fn put_pixel(&mut self, x: i64, y: i64, rgb: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        self.data[idx..idx + 3].copy_from_slice(&rgb);
    }

    /// Copy out the pixels inside `rect`, which must lie within the frame.
    pub fn crop(&self, rect: PixelRect) -> Frame {
        let row_bytes = rect.width as usize * 3;
        let mut data = Vec::with_capacity(row_bytes * rect.height as usize);
        for row in rect.y..rect.y + rect.height {
            let start = (row as usize * self.width as usize + rect.x as usize) * 3;
            data.extend_from_slice(&self.data[start..start + row_bytes]);
        }
        Frame {
            data,
            width: rect.width,
            height: rect.height,
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }
}

/// A face cut out of a frame, with landmarks moved into crop coordinates.
#[derive(Clone, Debug)]
pub struct FaceCrop {
    pub image: Frame,
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl FaceCrop {
    /// Cut `bbox` out of `frame`. `None` when the clamped box is empty.
    pub fn extract(frame: &Frame, bbox: &BoundingBox) -> Option<Self> {
        let rect = bbox.clamp_to(frame.width, frame.height)?;
        let (ox, oy) = (rect.x as f32, rect.y as f32);
        Some(Self {
            image: frame.crop(rect),
            landmarks: bbox.landmarks.map(|pts| pts.map(|(x, y)| (x - ox, y - oy))),
        })
    }
}
