//! Strings with `${name}` placeholders, resolved at execution time.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::Result;
use crate::vars::{is_valid_name, VariableStore};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(String),
}

/// Text split into literal runs and variable references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Text {
    segments: Vec<Segment>,
}

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^{}]*)\}").expect("placeholder pattern is valid"));

impl Text {
    pub fn literal(s: impl Into<String>) -> Self {
        let s = s.into();
        let segments = if s.is_empty() {
            Vec::new()
        } else {
            vec![Segment::Literal(s)]
        };
        Self { segments }
    }

    /// Split `raw` on `${name}` placeholders.
    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(raw) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            push_literal(&mut segments, &raw[last..whole.start()], raw)?;
            let name = name.as_str().trim();
            if !is_valid_name(name) {
                return Err(format!("invalid variable name '{name}' in \"{raw}\""));
            }
            segments.push(Segment::Var(name.to_string()));
            last = whole.end();
        }
        push_literal(&mut segments, &raw[last..], raw)?;
        Ok(Self { segments })
    }

    /// The text itself when it has no placeholders.
    pub fn as_literal(&self) -> Option<String> {
        self.segments
            .iter()
            .map(|seg| match seg {
                Segment::Literal(s) => Some(s.as_str()),
                Segment::Var(_) => None,
            })
            .collect()
    }

    /// Referenced variable names in order of appearance.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|seg| match seg {
            Segment::Var(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Substitute every placeholder from `vars`.
    pub fn render(&self, vars: &VariableStore) -> Result<String> {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(s) => out.push_str(s),
                Segment::Var(name) => out.push_str(&vars.get(name)?.to_string()),
            }
        }
        Ok(out)
    }
}

fn push_literal(
    segments: &mut Vec<Segment>,
    lit: &str,
    raw: &str,
) -> std::result::Result<(), String> {
    if lit.contains("${") {
        return Err(format!("unterminated '${{' in \"{raw}\""));
    }
    if !lit.is_empty() {
        segments.push(Segment::Literal(lit.to_string()));
    }
    Ok(())
}

impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for seg in &self.segments {
            match seg {
                Segment::Literal(s) => f.write_str(s)?,
                Segment::Var(name) => write!(f, "${{{name}}}")?,
            }
        }
        Ok(())
    }
}
