//! Screen captures and the capture collaborator.
//!
//! A [`Capture`] is taken fresh for every matching attempt and dropped once
//! the attempt is scored. Nothing in the engine holds on to one across
//! instructions.

use image::RgbaImage;

use crate::error::{Error, Result};
use crate::geometry::Size;

/// One frame of the screen in native (physical) pixels.
#[derive(Debug, Clone)]
pub struct Capture {
    image: RgbaImage,
}

impl Capture {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Build a capture from a raw RGBA8 buffer.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        let actual = pixels.len();
        RgbaImage::from_raw(width, height, pixels)
            .map(Self::new)
            .ok_or_else(|| {
                Error::Capture(format!(
                    "buffer of {actual} bytes does not hold a {width}x{height} RGBA frame \
                     ({expected} bytes)"
                ))
            })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn size(&self) -> Size {
        Size::new(self.width(), self.height())
    }

    pub fn is_empty(&self) -> bool {
        self.size().is_empty()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

/// Source of live screen pixels.
pub trait CaptureSource {
    /// Grab the current screen contents.
    fn capture(&mut self) -> Result<Capture>;

    /// The OS-reported logical screen size (the space input events live in).
    fn logical_size(&self) -> Result<Size>;
}

impl<T: CaptureSource + ?Sized> CaptureSource for Box<T> {
    fn capture(&mut self) -> Result<Capture> {
        (**self).capture()
    }

    fn logical_size(&self) -> Result<Size> {
        (**self).logical_size()
    }
}

/// Serves the same frame on every call.
///
/// Used for dry runs against a saved screenshot and in tests.
#[derive(Debug, Clone)]
pub struct StaticCapture {
    frame: RgbaImage,
    logical: Size,
}

impl StaticCapture {
    /// A frame whose logical size equals its pixel size (scale 1).
    pub fn new(frame: RgbaImage) -> Self {
        let logical = Size::new(frame.width(), frame.height());
        Self { frame, logical }
    }

    /// A frame captured on a display with the given logical size.
    pub fn with_logical_size(frame: RgbaImage, logical: Size) -> Self {
        Self { frame, logical }
    }
}

impl CaptureSource for StaticCapture {
    fn capture(&mut self) -> Result<Capture> {
        Ok(Capture::new(self.frame.clone()))
    }

    fn logical_size(&self) -> Result<Size> {
        Ok(self.logical)
    }
}
