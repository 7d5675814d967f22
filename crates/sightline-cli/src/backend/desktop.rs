//! Live desktop backend: xcap for capture, rustautogui for input, the
//! platform opener for launching.

use rustautogui::RustAutoGui;
use sightline_core::capture::{Capture, CaptureSource};
use sightline_core::error::{Error, Result};
use sightline_core::geometry::{Point, Size};
use sightline_core::input::InputSimulator;
use tracing::{debug, info};

/// Captures the primary monitor.
pub struct ScreenCapture {
    monitor: xcap::Monitor,
}

impl ScreenCapture {
    pub fn primary() -> anyhow::Result<Self> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| anyhow::anyhow!("Failed to enumerate monitors: {e}"))?;

        let mut first = None;
        for monitor in monitors {
            if monitor.is_primary().unwrap_or(false) {
                first = Some(monitor);
                break;
            }
            first.get_or_insert(monitor);
        }
        let monitor = first.ok_or_else(|| anyhow::anyhow!("No monitors found"))?;

        let name = monitor.name().unwrap_or_default();
        info!(monitor = name.as_str(), "capturing monitor");
        Ok(Self { monitor })
    }
}

impl CaptureSource for ScreenCapture {
    fn capture(&mut self) -> Result<Capture> {
        let image = self
            .monitor
            .capture_image()
            .map_err(|e| Error::Capture(format!("failed to capture monitor: {e}")))?;
        Ok(Capture::new(image))
    }

    fn logical_size(&self) -> Result<Size> {
        let width = self
            .monitor
            .width()
            .map_err(|e| Error::ScaleResolution(format!("failed to get monitor width: {e}")))?;
        let height = self
            .monitor
            .height()
            .map_err(|e| Error::ScaleResolution(format!("failed to get monitor height: {e}")))?;
        Ok(Size::new(width, height))
    }
}

/// Sends real mouse and keyboard events.
pub struct DesktopInput {
    gui: RustAutoGui,
}

impl DesktopInput {
    pub fn new() -> anyhow::Result<Self> {
        let gui = RustAutoGui::new(false)
            .map_err(|e| anyhow::anyhow!("Failed to initialize input: {e}"))?;
        Ok(Self { gui })
    }

    fn move_mouse(&mut self, at: Point) -> Result<()> {
        // Coordinates are already clamped to the logical screen.
        let (x, y) = (at.x.round() as u32, at.y.round() as u32);
        self.gui
            .move_mouse_to_pos(x, y, 0.0)
            .map_err(|e| input_error("move mouse", e))
    }
}

fn input_error(what: &str, e: impl std::fmt::Display) -> Error {
    Error::InputSimulation(format!("failed to {what}: {e}"))
}

impl InputSimulator for DesktopInput {
    fn click(&mut self, at: Point) -> Result<()> {
        self.move_mouse(at)?;
        self.gui.left_click().map_err(|e| input_error("click", e))?;
        debug!(x = at.x, y = at.y, "clicked");
        Ok(())
    }

    fn scroll(&mut self, dx: i32, dy: i32) -> Result<()> {
        for _ in 0..dy.unsigned_abs() {
            let r = if dy < 0 {
                self.gui.scroll_up(1)
            } else {
                self.gui.scroll_down(1)
            };
            r.map_err(|e| input_error("scroll", e))?;
        }
        for _ in 0..dx.unsigned_abs() {
            let r = if dx < 0 {
                self.gui.scroll_left(1)
            } else {
                self.gui.scroll_right(1)
            };
            r.map_err(|e| input_error("scroll", e))?;
        }
        Ok(())
    }

    fn move_to(&mut self, at: Point) -> Result<()> {
        self.move_mouse(at)
    }

    fn type_text(&mut self, text: &str) -> Result<()> {
        self.gui
            .keyboard_input(text)
            .map_err(|e| input_error("type text", e))
    }

    fn press_key(&mut self, key: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('+').map(str::trim).collect();
        let result = match parts.as_slice() {
            [single] => self.gui.keyboard_command(single),
            [a, b] => self.gui.keyboard_multi_key(a, b, None),
            [a, b, c] => self.gui.keyboard_multi_key(a, b, Some(*c)),
            _ => {
                return Err(Error::InputSimulation(format!(
                    "unsupported key combination '{key}' (at most three keys)"
                )))
            }
        };
        result.map_err(|e| input_error(&format!("press '{key}'"), e))
    }

    fn open(&mut self, target: &str) -> Result<()> {
        open::that_detached(target).map_err(|e| input_error(&format!("open '{target}'"), e))?;
        info!(target, "opened");
        Ok(())
    }
}
