//! Screen and input backends for a run.
//!
//! A replay backend serves a screenshot as the live screen and records input
//! instead of sending it. Without `--screen` the desktop backend is used,
//! which needs the `desktop` feature.

#[cfg(feature = "desktop")]
mod desktop;

use std::path::Path;

use anyhow::Context;
use sightline_core::capture::{CaptureSource, StaticCapture};
use sightline_core::clock::{Clock, ManualClock};
use sightline_core::geometry::Size;
use sightline_core::input::{InputSimulator, RecordingInput};
use tracing::info;

pub struct Backend {
    pub capture: Box<dyn CaptureSource>,
    pub input: Box<dyn InputSimulator>,
    pub clock: Box<dyn Clock>,
    /// True when input is recorded rather than delivered.
    pub dry_run: bool,
}

/// Pick a backend: replay `screen` if given, otherwise the live desktop.
pub fn select(screen: Option<&Path>, logical: Option<Size>) -> anyhow::Result<Backend> {
    match screen {
        Some(path) => replay(path, logical),
        None => live(),
    }
}

/// Replay a screenshot. Virtual time makes waits and timeouts instant since
/// the frame never changes.
pub fn replay(path: &Path, logical: Option<Size>) -> anyhow::Result<Backend> {
    let frame = image::open(path)
        .with_context(|| format!("Failed to load screen image {}", path.display()))?
        .to_rgba8();
    let logical = logical.unwrap_or_else(|| Size::new(frame.width(), frame.height()));
    info!(
        path = %path.display(),
        width = frame.width(),
        height = frame.height(),
        logical_width = logical.width,
        logical_height = logical.height,
        "replaying screenshot"
    );

    Ok(Backend {
        capture: Box::new(StaticCapture::with_logical_size(frame, logical)),
        input: Box::new(RecordingInput::new()),
        clock: Box::new(ManualClock::new()),
        dry_run: true,
    })
}

#[cfg(feature = "desktop")]
fn live() -> anyhow::Result<Backend> {
    let capture = desktop::ScreenCapture::primary()?;
    let input = desktop::DesktopInput::new()?;
    Ok(Backend {
        capture: Box::new(capture),
        input: Box::new(input),
        clock: Box::new(sightline_core::clock::SystemClock::new()),
        dry_run: false,
    })
}

#[cfg(not(feature = "desktop"))]
fn live() -> anyhow::Result<Backend> {
    anyhow::bail!(
        "no screen source: pass --screen <PNG> for a dry run, or rebuild with --features desktop"
    )
}
