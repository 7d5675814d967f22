//! Core types and logic for sightline.
//!
//! This crate finds reference images on screen and drives input against
//! them. It knows nothing about real displays or real input devices; those
//! arrive through the [`capture::CaptureSource`] and [`input::InputSimulator`]
//! traits so the CLI can plug in a desktop backend or a replay backend.
//!
//! # Modules
//!
//! - [`error`]: Error types with actionable suggestions
//! - [`matcher`]: Coarse-to-fine normalized cross-correlation search
//! - [`retry`]: Polling a live screen until a template appears
//! - [`scale`]: Display scale detection (Retina and friends)
//! - [`coords`]: Capture-pixel to logical-point mapping
//! - [`template`]: Template loading and caching
//! - [`script`]: Automation script parser
//! - [`executor`]: Running a parsed script
//! - [`vars`]: Script variables with optional persistence
//!
//! # Scripts
//!
//! | Instruction | Example |
//! |-------------|---------|
//! | **click** / **hover** | `click login_button timeout=5s` |
//! | **click_at** | `click_at 120 ${y}` |
//! | **scroll** | `scroll down 5` |
//! | **wait** | `wait 500ms` |
//! | **type** / **press** | `type "hello ${name}"`, `press cmd+s` |
//! | **log** | `log "step ${i}"` |
//! | **open** | `open Calculator` |
//! | **repeat** | `repeat 3 { ... }` |
//! | **if found** | `if found dialog { ... } else { ... }` |
//! | **try** | `try { click cookie_banner }` |
//! | **assignment** | `count = count + 1` |
//! | **abort** | `abort "nothing to do"` |
//!
//! Coordinates reported by the matcher are in capture pixels. They are
//! divided by the display scale before any input is dispatched, so a match at
//! (200, 100) on a 2x display clicks logical (100, 50).

pub mod capture;
pub mod clock;
pub mod coords;
pub mod error;
pub mod executor;
pub mod geometry;
pub mod input;
pub mod matcher;
pub mod retry;
pub mod scale;
pub mod script;
pub mod template;
pub mod vars;

#[cfg(test)]
mod testing;

pub use error::{Error, ErrorCode, Result};
