//! Shared fixtures for unit tests.

use image::{GrayImage, Luma, Rgba, RgbaImage};

use crate::capture::{Capture, CaptureSource};
use crate::error::Result;
use crate::geometry::Size;

/// A black and white checkerboard with square cells of `cell` pixels.
pub fn checker(width: u32, height: u32, cell: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        if (x / cell + y / cell) % 2 == 0 {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// A framed button with a gradient fill and three dark label blocks.
///
/// Its features are several pixels wide, so it survives downsampling.
pub fn button(width: u32, height: u32) -> GrayImage {
    let border = (height / 10).max(2);
    let block_w = (width / 10).max(2);
    GrayImage::from_fn(width, height, |x, y| {
        let v = if x < border || y < border || x >= width - border || y >= height - border {
            30
        } else if y >= height / 3 && y < height * 2 / 3 && (1..=3).any(|i| {
            let left = width * i / 4 - block_w / 2;
            x >= left && x < left + block_w
        }) {
            60
        } else {
            180 + (x * 60 / width) as u8
        };
        Luma([v])
    })
}

/// A smooth diagonal ramp. Uncorrelated with any checkerboard.
pub fn backdrop(width: u32, height: u32) -> RgbaImage {
    let span = (width + height).max(1);
    RgbaImage::from_fn(width, height, |x, y| {
        let v = (40 + (x + y) * 150 / span) as u8;
        Rgba([v, v, v, 255])
    })
}

/// Copy `patch` onto `screen` with its top-left corner at `(x, y)`.
pub fn paste(screen: &mut RgbaImage, patch: &GrayImage, x: u32, y: u32) {
    for (px, py, Luma([v])) in patch.enumerate_pixels() {
        screen.put_pixel(x + px, y + py, Rgba([*v, *v, *v, 255]));
    }
}

/// Nearest-neighbour upscale by an integer factor.
pub fn upscale(img: &GrayImage, factor: u32) -> GrayImage {
    GrayImage::from_fn(img.width() * factor, img.height() * factor, |x, y| {
        *img.get_pixel(x / factor, y / factor)
    })
}

/// Serves `frames` in order, repeating the last one, and counts captures.
pub struct ScriptedCapture {
    frames: Vec<RgbaImage>,
    logical: Size,
    pub captures: usize,
}

impl ScriptedCapture {
    pub fn new(frames: Vec<RgbaImage>, logical: Size) -> Self {
        assert!(!frames.is_empty());
        Self {
            frames,
            logical,
            captures: 0,
        }
    }
}

impl CaptureSource for ScriptedCapture {
    fn capture(&mut self) -> Result<Capture> {
        let idx = self.captures.min(self.frames.len() - 1);
        self.captures += 1;
        Ok(Capture::new(self.frames[idx].clone()))
    }

    fn logical_size(&self) -> Result<Size> {
        Ok(self.logical)
    }
}
