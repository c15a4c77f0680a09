//! Live overlay: boxes, label tags and the transient sign-in banner.
//!
//! Pixels (box outlines, coloured tag bars) are drawn into a copy of the raw
//! frame. Text is returned as [`Caption`]s for the display surface to
//! typeset, so the renderer stays free of font handling.

use crate::annotation::{FaceAnnotation, LabelCategory};
use crate::frame::Frame;
use crate::types::{Identity, PixelRect};
use std::time::{Duration, Instant};

pub const COLOR_MATCHED: [u8; 3] = [0, 255, 0];
pub const COLOR_UNMATCHED: [u8; 3] = [255, 0, 0];
pub const COLOR_MASK_BLOCKED: [u8; 3] = [255, 255, 0];
pub const COLOR_BANNER: [u8; 3] = [0, 255, 0];

pub const DEFAULT_BANNER_TTL: Duration = Duration::from_secs(1);

const BOX_THICKNESS: u32 = 2;
const TAG_HEIGHT: u32 = 4;
/// Captions sit this far above the box top, clamped to the frame edge.
const CAPTION_RAISE: u32 = 35;
const BANNER_ORIGIN: (u32, u32) = (20, 20);

pub fn category_color(category: LabelCategory) -> [u8; 3] {
    match category {
        LabelCategory::Matched => COLOR_MATCHED,
        LabelCategory::Unmatched => COLOR_UNMATCHED,
        LabelCategory::MaskBlocked => COLOR_MASK_BLOCKED,
    }
}

/// Text to draw at a pixel position.
#[derive(Debug, Clone, PartialEq)]
pub struct Caption {
    pub x: u32,
    pub y: u32,
    pub text: String,
    pub color: [u8; 3],
}

/// A frame ready for the display surface.
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    pub frame: Frame,
    pub captions: Vec<Caption>,
}

/// "Just signed in" message, visible for `ttl` after it was raised.
///
/// Visibility is a pure function of the query instant, so no timer is
/// needed to hide it.
#[derive(Debug, Clone, PartialEq)]
pub struct Banner {
    pub message: String,
    raised_at: Instant,
    ttl: Duration,
}

impl Banner {
    pub fn new(message: impl Into<String>, raised_at: Instant, ttl: Duration) -> Self {
        Self {
            message: message.into(),
            raised_at,
            ttl,
        }
    }

    pub fn signed_in(identity: &Identity, raised_at: Instant, ttl: Duration) -> Self {
        Self::new(format!("{identity} signed in"), raised_at, ttl)
    }

    pub fn is_visible_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.raised_at) < self.ttl
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FaceTrackRenderer;

impl FaceTrackRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Draw `annotations` and, if still visible at `now`, the banner onto a
    /// copy of `frame`. The annotations may come from an earlier frame.
    pub fn render(
        &self,
        frame: &Frame,
        annotations: &[FaceAnnotation],
        banner: Option<&Banner>,
        now: Instant,
    ) -> RenderedFrame {
        let mut canvas = frame.clone();
        let mut captions = Vec::with_capacity(annotations.len() + 1);

        for annotation in annotations {
            let Some(rect) = annotation.bbox.clamp_to(frame.width, frame.height) else {
                continue;
            };
            let color = category_color(annotation.category());

            draw_outline(&mut canvas, rect, BOX_THICKNESS, color);
            draw_tag(&mut canvas, rect, color);

            captions.push(Caption {
                x: rect.x,
                y: rect.y.saturating_sub(CAPTION_RAISE),
                text: annotation.display_label(),
                color,
            });
        }

        if let Some(banner) = banner.filter(|b| b.is_visible_at(now)) {
            captions.push(Caption {
                x: BANNER_ORIGIN.0,
                y: BANNER_ORIGIN.1,
                text: banner.message.clone(),
                color: COLOR_BANNER,
            });
        }

        RenderedFrame {
            frame: canvas,
            captions,
        }
    }
}

fn fill_rect(canvas: &mut Frame, x0: i64, y0: i64, x1: i64, y1: i64, color: [u8; 3]) {
    for y in y0..y1 {
        for x in x0..x1 {
            canvas.put_pixel(x, y, color);
        }
    }
}

/// Rectangle outline drawn inward from the rect edges.
fn draw_outline(canvas: &mut Frame, rect: PixelRect, thickness: u32, color: [u8; 3]) {
    let (x0, y0) = (rect.x as i64, rect.y as i64);
    let (x1, y1) = (x0 + rect.width as i64, y0 + rect.height as i64);
    let t = thickness as i64;

    fill_rect(canvas, x0, y0, x1, (y0 + t).min(y1), color);
    fill_rect(canvas, x0, (y1 - t).max(y0), x1, y1, color);
    fill_rect(canvas, x0, y0, (x0 + t).min(x1), y1, color);
    fill_rect(canvas, (x1 - t).max(x0), y0, x1, y1, color);
}

/// Solid bar above the box marking its category; pushed inside the box
/// when the box touches the top edge.
fn draw_tag(canvas: &mut Frame, rect: PixelRect, color: [u8; 3]) {
    let x0 = rect.x as i64;
    let x1 = x0 + rect.width as i64;
    let top = if rect.y >= TAG_HEIGHT {
        rect.y - TAG_HEIGHT
    } else {
        rect.y
    } as i64;
    fill_rect(canvas, x0, top, x1, top + TAG_HEIGHT as i64, color);
}
