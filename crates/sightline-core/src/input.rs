//! Synthetic input collaborator.
//!
//! All coordinates handed to an [`InputSimulator`] are in logical space,
//! already mapped and clamped by [`crate::coords`].

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geometry::Point;

/// Drives the OS input stack. Failures map to `Error::InputSimulation`.
pub trait InputSimulator {
    fn click(&mut self, at: Point) -> Result<()>;

    /// Scroll by whole notches. Positive `dy` scrolls down, positive `dx` right.
    fn scroll(&mut self, dx: i32, dy: i32) -> Result<()>;

    fn move_to(&mut self, at: Point) -> Result<()>;

    fn type_text(&mut self, text: &str) -> Result<()>;

    /// Press a key or a `+`-joined combination such as `cmd+c`.
    fn press_key(&mut self, key: &str) -> Result<()>;

    /// Hand an application, file or URL to the desktop's default opener.
    fn open(&mut self, target: &str) -> Result<()>;
}

impl<T: InputSimulator + ?Sized> InputSimulator for Box<T> {
    fn click(&mut self, at: Point) -> Result<()> {
        (**self).click(at)
    }

    fn scroll(&mut self, dx: i32, dy: i32) -> Result<()> {
        (**self).scroll(dx, dy)
    }

    fn move_to(&mut self, at: Point) -> Result<()> {
        (**self).move_to(at)
    }

    fn type_text(&mut self, text: &str) -> Result<()> {
        (**self).type_text(text)
    }

    fn press_key(&mut self, key: &str) -> Result<()> {
        (**self).press_key(key)
    }

    fn open(&mut self, target: &str) -> Result<()> {
        (**self).open(target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    pub fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "up" => Some(ScrollDirection::Up),
            "down" => Some(ScrollDirection::Down),
            "left" => Some(ScrollDirection::Left),
            "right" => Some(ScrollDirection::Right),
            _ => None,
        }
    }

    /// `(dx, dy)` for scrolling `amount` notches in this direction.
    pub fn delta(self, amount: i32) -> (i32, i32) {
        match self {
            ScrollDirection::Up => (0, -amount),
            ScrollDirection::Down => (0, amount),
            ScrollDirection::Left => (-amount, 0),
            ScrollDirection::Right => (amount, 0),
        }
    }
}

/// One dispatched input action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum InputEvent {
    Click { x: f64, y: f64 },
    Scroll { dx: i32, dy: i32 },
    Move { x: f64, y: f64 },
    Type { text: String },
    Press { key: String },
    Open { target: String },
}

/// Records every event instead of touching the OS, logging each at INFO.
#[derive(Debug, Default)]
pub struct RecordingInput {
    events: Vec<InputEvent>,
}

impl RecordingInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[InputEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<InputEvent> {
        self.events
    }

    fn record(&mut self, event: InputEvent) -> Result<()> {
        tracing::info!(?event, "input (dry run)");
        self.events.push(event);
        Ok(())
    }
}

impl InputSimulator for RecordingInput {
    fn click(&mut self, at: Point) -> Result<()> {
        self.record(InputEvent::Click { x: at.x, y: at.y })
    }

    fn scroll(&mut self, dx: i32, dy: i32) -> Result<()> {
        self.record(InputEvent::Scroll { dx, dy })
    }

    fn move_to(&mut self, at: Point) -> Result<()> {
        self.record(InputEvent::Move { x: at.x, y: at.y })
    }

    fn type_text(&mut self, text: &str) -> Result<()> {
        self.record(InputEvent::Type { text: text.into() })
    }

    fn press_key(&mut self, key: &str) -> Result<()> {
        self.record(InputEvent::Press { key: key.into() })
    }

    fn open(&mut self, target: &str) -> Result<()> {
        self.record(InputEvent::Open {
            target: target.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scroll_direction_parse_is_case_insensitive() {
        assert_eq!(ScrollDirection::parse("Down"), Some(ScrollDirection::Down));
        assert_eq!(ScrollDirection::parse("LEFT"), Some(ScrollDirection::Left));
        assert_eq!(ScrollDirection::parse("sideways"), None);
    }

    #[test]
    fn test_scroll_delta_signs() {
        assert_eq!(ScrollDirection::Up.delta(3), (0, -3));
        assert_eq!(ScrollDirection::Down.delta(3), (0, 3));
        assert_eq!(ScrollDirection::Left.delta(2), (-2, 0));
        assert_eq!(ScrollDirection::Right.delta(2), (2, 0));
    }

    #[test]
    fn test_recording_input_keeps_order() {
        let mut input = RecordingInput::new();
        input.click(Point::new(1.0, 2.0)).unwrap();
        input.type_text("hi").unwrap();
        input.press_key("enter").unwrap();
        input.open("Calculator").unwrap();
        assert_eq!(
            input.events(),
            &[
                InputEvent::Click { x: 1.0, y: 2.0 },
                InputEvent::Type { text: "hi".into() },
                InputEvent::Press {
                    key: "enter".into()
                },
                InputEvent::Open {
                    target: "Calculator".into()
                },
            ]
        );
    }

    #[test]
    fn test_input_event_json_is_tagged() {
        let json = serde_json::to_string(&InputEvent::Scroll { dx: 0, dy: 3 }).unwrap();
        assert_eq!(json, r#"{"action":"scroll","dx":0,"dy":3}"#);
    }
}
