//! Error taxonomy with actionable suggestions.
//!
//! Every runtime failure carries a stable [`ErrorCode`] for machine consumers
//! and a human-readable hint from [`Error::suggestion`]. Transient "target not
//! visible yet" conditions are not errors; they are absorbed by the retry
//! controller and only surface as [`Error::MatchTimeout`] once the policy is
//! exhausted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scores below this are reported as "target absent" rather than "below threshold".
const ABSENT_SCORE: f64 = 0.5;

pub type Result<T> = std::result::Result<T, Error>;

/// Stable error codes for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    TemplateNotFound,
    MatchTimeout,
    ParseError,
    ScaleResolutionError,
    UndefinedVariable,
    InputSimulationError,
    CaptureError,
    ExpressionError,
    PersistenceError,
    Aborted,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::TemplateNotFound => "TEMPLATE_NOT_FOUND",
            ErrorCode::MatchTimeout => "MATCH_TIMEOUT",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::ScaleResolutionError => "SCALE_RESOLUTION_ERROR",
            ErrorCode::UndefinedVariable => "UNDEFINED_VARIABLE",
            ErrorCode::InputSimulationError => "INPUT_SIMULATION_ERROR",
            ErrorCode::CaptureError => "CAPTURE_ERROR",
            ErrorCode::ExpressionError => "EXPRESSION_ERROR",
            ErrorCode::PersistenceError => "PERSISTENCE_ERROR",
            ErrorCode::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Template '{id}' not found: {reason}")]
    TemplateNotFound { id: String, reason: String },

    #[error(
        "Template '{template}' not matched within {timeout_ms}ms \
         (best score {last_score:.3}, threshold {threshold:.2}, {attempts} attempts)"
    )]
    MatchTimeout {
        template: String,
        last_score: f64,
        threshold: f64,
        attempts: u32,
        timeout_ms: u64,
    },

    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Cannot resolve display scale: {0}")]
    ScaleResolution(String),

    #[error("Variable '{0}' is not defined")]
    UndefinedVariable(String),

    #[error("Input simulation failed: {0}")]
    InputSimulation(String),

    #[error("Screen capture failed: {0}")]
    Capture(String),

    #[error("Invalid expression: {0}")]
    Expression(String),

    #[error("Variable persistence failed: {0}")]
    Persistence(String),

    #[error("Run aborted")]
    Aborted,
}

impl Error {
    pub fn template_not_found(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::TemplateNotFound {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            line,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Error::TemplateNotFound { .. } => ErrorCode::TemplateNotFound,
            Error::MatchTimeout { .. } => ErrorCode::MatchTimeout,
            Error::Parse { .. } => ErrorCode::ParseError,
            Error::ScaleResolution(_) => ErrorCode::ScaleResolutionError,
            Error::UndefinedVariable(_) => ErrorCode::UndefinedVariable,
            Error::InputSimulation(_) => ErrorCode::InputSimulationError,
            Error::Capture(_) => ErrorCode::CaptureError,
            Error::Expression(_) => ErrorCode::ExpressionError,
            Error::Persistence(_) => ErrorCode::PersistenceError,
            Error::Aborted => ErrorCode::Aborted,
        }
    }

    /// Best score observed before giving up, for match failures.
    pub fn last_score(&self) -> Option<f64> {
        match self {
            Error::MatchTimeout { last_score, .. } => Some(*last_score),
            _ => None,
        }
    }

    /// A hint for fixing the failure. Never empty.
    pub fn suggestion(&self) -> String {
        match self {
            Error::TemplateNotFound { id, .. } => format!(
                "Add '{id}.png' (or .jpg/.jpeg) to the templates directory, or pass --templates"
            ),
            Error::MatchTimeout {
                last_score,
                threshold,
                ..
            } if *last_score < ABSENT_SCORE => format!(
                "The target does not appear to be on screen (best score {last_score:.2} vs \
                 threshold {threshold:.2}). Check that the window is visible, or raise timeout="
            ),
            Error::MatchTimeout { threshold, .. } => format!(
                "Something similar is on screen but scored below {threshold:.2}. Recapture the \
                 template at the current scale or lower its threshold in the sidecar .json"
            ),
            Error::Parse { .. } => {
                "Fix the script line shown; run 'sightline check <script>' to validate".into()
            }
            Error::ScaleResolution(_) => {
                "Check that the capture backend returns a non-empty image and pass --logical WxH \
                 if the logical size is not reported"
                    .into()
            }
            Error::UndefinedVariable(name) => format!(
                "Assign '{name}' earlier in the script, declare 'var {name} = ...', or pass \
                 --var {name}=VALUE"
            ),
            Error::InputSimulation(_) => {
                "Grant the process accessibility/input permissions and retry".into()
            }
            Error::Capture(_) => {
                "Grant screen recording permission or pass --screen <png> for a dry run".into()
            }
            Error::Expression(_) => {
                "Arithmetic needs numeric operands; quote text and use + to concatenate".into()
            }
            Error::Persistence(_) => {
                "Check that the sightline data directory is writable (override with SIGHTLINE_HOME)"
                    .into()
            }
            Error::Aborted => "The run was cancelled; rerun the script to start over".into(),
        }
    }
}
