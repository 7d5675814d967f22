//! Display scale resolution.
//!
//! On high-density displays the capture has more pixels than the logical
//! coordinate space input events are expressed in. The ratio is resolved once
//! per run and re-resolved only when a capture disagrees with the cached
//! assumption (the user changed resolution or moved to another display).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capture::Capture;
use crate::error::{Error, Result};
use crate::geometry::Size;

/// Physical pixels per logical pixel. Always finite and positive.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct ScaleFactor(f64);

impl ScaleFactor {
    pub const NATIVE: ScaleFactor = ScaleFactor(1.0);

    pub fn new(value: f64) -> Option<Self> {
        (value.is_finite() && value > 0.0).then_some(ScaleFactor(value))
    }

    pub fn get(self) -> f64 {
        self.0
    }

    /// Whether this scale is indistinguishable from 1:1.
    pub fn is_native(self) -> bool {
        (self.0 - 1.0).abs() < 1e-3
    }
}

impl Default for ScaleFactor {
    fn default() -> Self {
        ScaleFactor::NATIVE
    }
}

impl fmt::Display for ScaleFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}x", self.0)
    }
}

impl TryFrom<f64> for ScaleFactor {
    type Error = String;

    fn try_from(value: f64) -> std::result::Result<Self, Self::Error> {
        ScaleFactor::new(value).ok_or_else(|| format!("scale factor must be positive, got {value}"))
    }
}

impl From<ScaleFactor> for f64 {
    fn from(scale: ScaleFactor) -> f64 {
        scale.0
    }
}

/// Compute `capture.width / logical.width`.
pub fn resolve(capture: &Capture, logical: Size) -> Result<ScaleFactor> {
    if logical.is_empty() {
        return Err(Error::ScaleResolution(format!(
            "logical screen size is {}x{}",
            logical.width, logical.height
        )));
    }
    if capture.is_empty() {
        return Err(Error::ScaleResolution("capture is empty".into()));
    }
    let ratio = f64::from(capture.width()) / f64::from(logical.width);
    ScaleFactor::new(ratio)
        .ok_or_else(|| Error::ScaleResolution(format!("computed an invalid ratio {ratio}")))
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Resolved {
    scale: ScaleFactor,
    capture: Size,
    logical: Size,
}

/// Per-run cache of the display scale.
#[derive(Debug, Default, Clone)]
pub struct ScaleResolver {
    cached: Option<Resolved>,
}

impl ScaleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached scale, if one has been resolved.
    pub fn current(&self) -> Option<ScaleFactor> {
        self.cached.map(|r| r.scale)
    }

    /// Return the cached scale when `capture` and `logical` match the sizes it
    /// was resolved from, otherwise resolve again and replace the cache.
    pub fn observe(&mut self, capture: &Capture, logical: Size) -> Result<ScaleFactor> {
        let capture_size = capture.size();
        if let Some(resolved) = self.cached {
            if resolved.capture == capture_size && resolved.logical == logical {
                return Ok(resolved.scale);
            }
        }

        let scale = resolve(capture, logical)?;
        match self.cached {
            Some(previous) => tracing::info!(
                from = %previous.scale,
                to = %scale,
                capture = ?capture_size,
                "display scale changed, re-resolved"
            ),
            None => tracing::debug!(%scale, capture = ?capture_size, "display scale resolved"),
        }
        self.cached = Some(Resolved {
            scale,
            capture: capture_size,
            logical,
        });
        Ok(scale)
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}
