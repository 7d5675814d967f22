//! Automation scripts: syntax tree and parser.
//!
//! A script is parsed in full before anything runs. The result is an
//! immutable [`Program`] that any number of executors may walk concurrently.
//!
//! ```text
//! # Title: Log in
//! var user = "guest"
//! click login_button timeout=5s
//! type "${user}"
//! repeat 3 {
//!     scroll down
//! }
//! try {
//!     click cookie_banner_close timeout=2s
//! }
//! if found welcome_banner {
//!     log "logged in as ${user}"
//! } else {
//!     abort "login failed"
//! }
//! ```

mod expr;
mod lexer;
mod parser;
mod text;

use std::collections::BTreeMap;
use std::time::Duration;

pub use expr::{BinaryOp, Expr};
pub use parser::{parse_duration, ParseOptions};
pub use text::Text;

use crate::error::Result;
use crate::input::ScrollDirection;
use crate::retry::RetryPolicy;
use crate::vars::Value;

/// A visual target: which template to look for and how long to keep looking.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    /// Template id, possibly containing `${name}` references.
    pub template: Text,
    pub policy: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    Click {
        target: Target,
        best_effort: bool,
    },
    Hover {
        target: Target,
        best_effort: bool,
    },
    /// Click at explicit logical coordinates.
    ClickAt {
        x: Expr,
        y: Expr,
    },
    Scroll {
        direction: ScrollDirection,
        amount: Expr,
    },
    Wait {
        duration: Duration,
    },
    Type {
        text: Text,
    },
    Press {
        key: Text,
    },
    Log {
        message: Text,
    },
    /// Launch an application or open a file or URL.
    Open {
        target: Text,
    },
    Repeat {
        count: Expr,
        body: Vec<Instruction>,
    },
    SetVariable {
        name: String,
        value: Expr,
    },
    /// Run `then_body` if the target becomes visible within its policy, else `else_body`.
    IfFound {
        target: Target,
        then_body: Vec<Instruction>,
        else_body: Vec<Instruction>,
    },
    /// Run `body`, logging and skipping any instruction in it whose target
    /// is missing or never appears.
    Try {
        body: Vec<Instruction>,
    },
    Abort {
        reason: Option<Text>,
    },
}

impl InstructionKind {
    /// The script keyword for this instruction.
    pub fn keyword(&self) -> &'static str {
        match self {
            InstructionKind::Click { .. } => "click",
            InstructionKind::Hover { .. } => "hover",
            InstructionKind::ClickAt { .. } => "click_at",
            InstructionKind::Scroll { .. } => "scroll",
            InstructionKind::Wait { .. } => "wait",
            InstructionKind::Type { .. } => "type",
            InstructionKind::Press { .. } => "press",
            InstructionKind::Log { .. } => "log",
            InstructionKind::Open { .. } => "open",
            InstructionKind::Repeat { .. } => "repeat",
            InstructionKind::SetVariable { .. } => "set",
            InstructionKind::IfFound { .. } => "if found",
            InstructionKind::Try { .. } => "try",
            InstructionKind::Abort { .. } => "abort",
        }
    }

    /// Nested sequences owned by this instruction, in source order.
    pub fn children(&self) -> Vec<&[Instruction]> {
        match self {
            InstructionKind::Repeat { body, .. } | InstructionKind::Try { body } => {
                vec![body.as_slice()]
            }
            InstructionKind::IfFound {
                then_body,
                else_body,
                ..
            } => vec![then_body.as_slice(), else_body.as_slice()],
            _ => Vec::new(),
        }
    }
}

/// One step of a program.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Position in a pre-order walk of the whole program, starting at 0.
    pub index: usize,
    /// 1-based source line.
    pub line: usize,
    pub kind: InstructionKind,
}

/// `# Title:` and `# Description:` header comments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub title: Option<String>,
    pub description: Option<String>,
}

/// A parsed script.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    instructions: Vec<Instruction>,
    defaults: BTreeMap<String, Value>,
    metadata: Metadata,
    len: usize,
}

impl Program {
    /// Parse with default options.
    pub fn parse(source: &str) -> Result<Program> {
        Self::parse_with(source, &ParseOptions::default())
    }

    pub fn parse_with(source: &str, options: &ParseOptions) -> Result<Program> {
        parser::parse(source, options)
    }

    /// Top-level instructions.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Values declared with `var NAME = ...`.
    pub fn defaults(&self) -> &BTreeMap<String, Value> {
        &self.defaults
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Total number of instructions, nested ones included.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Every instruction in pre-order with its nesting depth.
    pub fn walk(&self) -> Vec<(usize, &Instruction)> {
        let mut out = Vec::with_capacity(self.len);
        let mut stack: Vec<(usize, &[Instruction])> = vec![(0, &self.instructions)];
        while let Some((depth, seq)) = stack.pop() {
            let Some((first, rest)) = seq.split_first() else {
                continue;
            };
            stack.push((depth, rest));
            out.push((depth, first));
            for child in first.kind.children().into_iter().rev() {
                stack.push((depth + 1, child));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_is_pre_order() {
        let program = Program::parse(
            "click a\nrepeat 2 {\n  click b\n  if found c {\n    click d\n  } else {\n    click e\n  }\n}\nclick f\n",
        )
        .unwrap();
        let walked: Vec<(usize, usize)> = program
            .walk()
            .into_iter()
            .map(|(depth, i)| (depth, i.index))
            .collect();
        assert_eq!(
            walked,
            vec![(0, 0), (0, 1), (1, 2), (1, 3), (2, 4), (2, 5), (0, 6)]
        );
        assert_eq!(program.len(), 7);
    }

    #[test]
    fn test_keywords() {
        let program = Program::parse("wait 1s\ntry {\n  open Notes\n}\nabort").unwrap();
        let keywords: Vec<_> = program
            .instructions()
            .iter()
            .map(|i| i.kind.keyword())
            .collect();
        assert_eq!(keywords, vec!["wait", "try", "abort"]);
    }
}
