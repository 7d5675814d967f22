//! Single-pass script parser.
//!
//! Lines are consumed top to bottom. Open `repeat`/`if` blocks sit on an
//! explicit stack; a closing `}` pops one and attaches it to its parent.
//! The first malformed line aborts parsing with its line number, so a
//! program is either fully built or not built at all.

use std::collections::BTreeMap;
use std::time::Duration;

use super::expr::Expr;
use super::lexer::{tokenize, Token};
use super::text::Text;
use super::{Instruction, InstructionKind, Metadata, Program, Target};
use crate::error::{Error, Result};
use crate::input::ScrollDirection;
use crate::retry::RetryPolicy;
use crate::vars::{is_valid_name, Value, VariableStore};

const DEFAULT_SCROLL_AMOUNT: f64 = 3.0;

/// Line-leading words that start a command and so never name a variable.
const COMMANDS: &[&str] = &[
    "click", "hover", "click_at", "scroll", "wait", "type", "press", "log", "open", "abort",
    "repeat", "if", "else", "try", "var",
];

fn is_command(word: &str) -> bool {
    COMMANDS.contains(&word)
}

/// Knobs that affect how scripts are parsed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOptions {
    /// Policy for visual instructions without `timeout=`/`interval=`.
    pub default_policy: RetryPolicy,
}

/// Parse `500ms`, `2s` or a bare number of seconds such as `1.5`.
pub fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    let raw = raw.trim();
    let (number, unit_ms) = if let Some(n) = raw.strip_suffix("ms") {
        (n, 1.0)
    } else if let Some(n) = raw.strip_suffix('s') {
        (n, 1000.0)
    } else {
        (raw, 1000.0)
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration '{raw}' (use e.g. 500ms, 2s or 1.5)"))?;
    let millis = value * unit_ms;
    if !millis.is_finite() || millis < 0.0 || millis > 1e12 {
        return Err(format!("duration '{raw}' is out of range"));
    }
    Ok(Duration::from_secs_f64(millis / 1000.0))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

pub(super) fn parse(source: &str, options: &ParseOptions) -> Result<Program> {
    let mut parser = Parser::new(options);
    for (i, line) in source.lines().enumerate() {
        parser
            .line(i + 1, line)
            .map_err(|message| Error::parse(i + 1, message))?;
    }
    parser.finish()
}

enum BlockKind {
    Repeat { count: Expr },
    Try,
    Then { target: Target },
    Else { target: Target, then_body: Vec<Instruction> },
}

struct OpenBlock {
    index: usize,
    line: usize,
    kind: BlockKind,
    body: Vec<Instruction>,
}

impl OpenBlock {
    fn keyword(&self) -> &'static str {
        match self.kind {
            BlockKind::Repeat { .. } => "repeat",
            BlockKind::Try => "try",
            BlockKind::Then { .. } => "if",
            BlockKind::Else { .. } => "else",
        }
    }
}

type LineResult<T = ()> = std::result::Result<T, String>;

struct Parser<'o> {
    options: &'o ParseOptions,
    root: Vec<Instruction>,
    stack: Vec<OpenBlock>,
    defaults: BTreeMap<String, Value>,
    metadata: Metadata,
    next_index: usize,
    /// Set right after an `if` block closes so a following `else {` can attach.
    else_allowed: bool,
}

impl<'o> Parser<'o> {
    fn new(options: &'o ParseOptions) -> Self {
        Self {
            options,
            root: Vec::new(),
            stack: Vec::new(),
            defaults: BTreeMap::new(),
            metadata: Metadata::default(),
            next_index: 0,
            else_allowed: false,
        }
    }

    fn finish(self) -> Result<Program> {
        if let Some(open) = self.stack.last() {
            return Err(Error::parse(
                open.line,
                format!("'{}' block is never closed (missing '}}')", open.keyword()),
            ));
        }
        Ok(Program {
            instructions: self.root,
            defaults: self.defaults,
            metadata: self.metadata,
            len: self.next_index,
        })
    }

    fn alloc_index(&mut self) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    fn body_mut(&mut self) -> &mut Vec<Instruction> {
        match self.stack.last_mut() {
            Some(open) => &mut open.body,
            None => &mut self.root,
        }
    }

    fn push(&mut self, line: usize, kind: InstructionKind) {
        let index = self.alloc_index();
        self.body_mut().push(Instruction { index, line, kind });
    }

    fn line(&mut self, line: usize, raw: &str) -> LineResult {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        if let Some(comment) = trimmed.strip_prefix('#') {
            self.header_comment(comment.trim());
            return Ok(());
        }

        let else_allowed = std::mem::take(&mut self.else_allowed);

        if let Some((name, rhs)) = split_assignment(trimmed).filter(|(name, _)| !is_command(name)) {
            let value = Expr::parse(rhs)?;
            self.push(
                line,
                InstructionKind::SetVariable {
                    name: name.to_string(),
                    value,
                },
            );
            return Ok(());
        }

        let tokens = tokenize(trimmed)?;
        let Some((first, rest)) = tokens.split_first() else {
            return Ok(());
        };

        match first {
            Token::Close => self.close_block(rest),
            Token::Word(w) if w == "else" => {
                if !else_allowed {
                    return Err("'else' without a preceding 'if found' block".into());
                }
                if rest != [Token::Open] {
                    return Err("expected '{' after 'else'".into());
                }
                self.reopen_else()
            }
            Token::Word(w) if w == "var" => self.declare(trimmed),
            Token::Word(cmd) => self.command(line, cmd, rest),
            Token::Open => Err(
                "unexpected '{' (blocks open at the end of 'repeat', 'if' or 'try' lines)".into(),
            ),
            Token::Named { key, .. } if is_command(key) => Err(format!(
                "'{key}' is a command and cannot be assigned (separate its arguments with a space)"
            )),
            Token::Quoted(_) | Token::Named { .. } => {
                Err("expected a command at the start of the line".into())
            }
        }
    }

    fn header_comment(&mut self, comment: &str) {
        if let Some((key, value)) = comment.split_once(':') {
            let value = value.trim().to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "title" if self.metadata.title.is_none() => self.metadata.title = Some(value),
                "description" if self.metadata.description.is_none() => {
                    self.metadata.description = Some(value)
                }
                _ => {}
            }
        }
    }

    fn close_block(&mut self, rest: &[Token]) -> LineResult {
        let open = self
            .stack
            .pop()
            .ok_or_else(|| "unmatched '}' (no open block)".to_string())?;

        let chained_else = match rest {
            [] => false,
            [Token::Word(w), Token::Open] if w == "else" => true,
            _ => return Err("unexpected text after '}'".into()),
        };

        match open.kind {
            BlockKind::Repeat { .. } | BlockKind::Try if chained_else => {
                Err("'else' can only follow an 'if found' block".into())
            }
            BlockKind::Repeat { count } => {
                self.body_mut().push(Instruction {
                    index: open.index,
                    line: open.line,
                    kind: InstructionKind::Repeat {
                        count,
                        body: open.body,
                    },
                });
                Ok(())
            }
            BlockKind::Try => {
                self.body_mut().push(Instruction {
                    index: open.index,
                    line: open.line,
                    kind: InstructionKind::Try { body: open.body },
                });
                Ok(())
            }
            BlockKind::Then { target } if chained_else => {
                self.stack.push(OpenBlock {
                    index: open.index,
                    line: open.line,
                    kind: BlockKind::Else {
                        target,
                        then_body: open.body,
                    },
                    body: Vec::new(),
                });
                Ok(())
            }
            BlockKind::Then { target } => {
                self.body_mut().push(Instruction {
                    index: open.index,
                    line: open.line,
                    kind: InstructionKind::IfFound {
                        target,
                        then_body: open.body,
                        else_body: Vec::new(),
                    },
                });
                self.else_allowed = true;
                Ok(())
            }
            BlockKind::Else { target, then_body } => {
                if chained_else {
                    return Err("an 'if found' block may only have one 'else'".into());
                }
                self.body_mut().push(Instruction {
                    index: open.index,
                    line: open.line,
                    kind: InstructionKind::IfFound {
                        target,
                        then_body,
                        else_body: open.body,
                    },
                });
                Ok(())
            }
        }
    }

    /// `else {` on its own line: take back the `if found` just closed.
    fn reopen_else(&mut self) -> LineResult {
        let Some(Instruction {
            index,
            line,
            kind:
                InstructionKind::IfFound {
                    target, then_body, ..
                },
        }) = self.body_mut().pop()
        else {
            return Err("'else' without a preceding 'if found' block".into());
        };
        self.stack.push(OpenBlock {
            index,
            line,
            kind: BlockKind::Else { target, then_body },
            body: Vec::new(),
        });
        Ok(())
    }

    /// `var NAME = CONSTANT`
    fn declare(&mut self, trimmed: &str) -> LineResult {
        if !self.stack.is_empty() {
            return Err("'var' declarations must be at the top level".into());
        }
        let decl = trimmed["var".len()..].trim_start();
        let (name, rhs) =
            split_assignment(decl).ok_or("expected 'var NAME = VALUE'".to_string())?;
        if is_command(name) {
            return Err(format!("'{name}' is a command and cannot name a variable"));
        }
        let expr = Expr::parse(rhs)?;
        if !expr.is_constant() {
            return Err(format!("default for '{name}' must not reference variables"));
        }
        let value = expr.eval(&VariableStore::new()).map_err(|e| e.to_string())?;
        self.defaults.insert(name.to_string(), value);
        Ok(())
    }

    fn command(&mut self, line: usize, cmd: &str, rest: &[Token]) -> LineResult {
        let (args, opens_block) = match rest.split_last() {
            Some((Token::Open, before)) => (before, true),
            _ => (rest, false),
        };
        let is_block = matches!(cmd, "repeat" | "if" | "try");
        if opens_block && !is_block {
            return Err(format!("'{cmd}' does not take a block"));
        }
        if is_block && !opens_block {
            return Err(format!("expected '{{' at the end of the '{cmd}' line"));
        }
        if args.iter().any(|t| matches!(t, Token::Open | Token::Close)) {
            return Err("braces must end a line or start it".into());
        }
        let free_text = matches!(cmd, "log" | "abort" | "open");
        let mut args = Args::new(cmd, args, free_text);

        match cmd {
            "click" | "hover" => {
                let template = args.text("a template id")?;
                let target = self.target(template, &mut args)?;
                let best_effort = args.flag("best_effort")?.unwrap_or(false);
                args.finish()?;
                let kind = if cmd == "click" {
                    InstructionKind::Click {
                        target,
                        best_effort,
                    }
                } else {
                    InstructionKind::Hover {
                        target,
                        best_effort,
                    }
                };
                self.push(line, kind);
            }
            "click_at" => {
                let x = args.expr("an x coordinate")?;
                let y = args.expr("a y coordinate")?;
                args.finish()?;
                self.push(line, InstructionKind::ClickAt { x, y });
            }
            "scroll" => {
                let dir = args.word("a direction (up, down, left, right)")?;
                let direction = ScrollDirection::parse(&dir)
                    .ok_or_else(|| format!("unknown scroll direction '{dir}'"))?;
                let amount = match args.optional_expr()? {
                    Some(expr) => expr,
                    None => Expr::Number(DEFAULT_SCROLL_AMOUNT),
                };
                args.finish()?;
                self.push(line, InstructionKind::Scroll { direction, amount });
            }
            "wait" => {
                let raw = args.word("a duration such as 500ms or 2s")?;
                let duration = parse_duration(&raw)?;
                args.finish()?;
                self.push(line, InstructionKind::Wait { duration });
            }
            "type" => {
                let text = args.text("the text to type")?;
                args.finish()?;
                self.push(line, InstructionKind::Type { text });
            }
            "press" => {
                let key = args.text("a key such as enter or cmd+c")?;
                args.finish()?;
                self.push(line, InstructionKind::Press { key });
            }
            "log" => {
                let message = args.joined_text("a message")?;
                args.finish()?;
                self.push(line, InstructionKind::Log { message });
            }
            "open" => {
                let target = args.joined_text("an application, file or URL")?;
                args.finish()?;
                self.push(line, InstructionKind::Open { target });
            }
            "abort" => {
                let reason = args.optional_joined_text()?;
                args.finish()?;
                self.push(line, InstructionKind::Abort { reason });
            }
            "repeat" => {
                let count = args.expr("a repeat count")?;
                args.finish()?;
                let index = self.alloc_index();
                self.stack.push(OpenBlock {
                    index,
                    line,
                    kind: BlockKind::Repeat { count },
                    body: Vec::new(),
                });
            }
            "try" => {
                args.finish()?;
                let index = self.alloc_index();
                self.stack.push(OpenBlock {
                    index,
                    line,
                    kind: BlockKind::Try,
                    body: Vec::new(),
                });
            }
            "if" => {
                let word = args.word("'found'")?;
                if word != "found" {
                    return Err(format!("expected 'if found TARGET {{', got 'if {word}'"));
                }
                let template = args.text("a template id")?;
                let target = self.target(template, &mut args)?;
                args.finish()?;
                let index = self.alloc_index();
                self.stack.push(OpenBlock {
                    index,
                    line,
                    kind: BlockKind::Then { target },
                    body: Vec::new(),
                });
            }
            other => return Err(format!("unknown command '{other}'")),
        }
        Ok(())
    }

    fn target(&self, template: Text, args: &mut Args<'_>) -> LineResult<Target> {
        let default = self.options.default_policy;
        let timeout = args.duration("timeout")?;
        let interval = args.duration("interval")?;
        let policy = match (timeout, interval) {
            (None, None) => Ok(default),
            (Some(t), None) => RetryPolicy::new(t, default.interval().min(t / 2)),
            (None, Some(i)) => RetryPolicy::new(default.timeout(), i),
            (Some(t), Some(i)) => RetryPolicy::new(t, i),
        }
        .map_err(|e| e.to_string())?;
        Ok(Target { template, policy })
    }
}

/// `NAME = rest` where NAME is an identifier directly followed by `=`.
fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let (lhs, rhs) = line.split_once('=')?;
    let name = lhs.trim();
    if !is_valid_name(name) || rhs.starts_with('=') {
        return None;
    }
    Some((name, rhs.trim()))
}

/// Positional and named arguments of one command line.
struct Args<'t> {
    cmd: &'t str,
    positional: std::collections::VecDeque<&'t Token>,
    named: Vec<(&'t str, &'t str)>,
}

impl<'t> Args<'t> {
    /// With `free_text`, `key=value` tokens stay positional as literal text.
    fn new(cmd: &'t str, tokens: &'t [Token], free_text: bool) -> Self {
        let mut positional = std::collections::VecDeque::new();
        let mut named = Vec::new();
        for tok in tokens {
            match tok {
                Token::Named { key, value } if !free_text => {
                    named.push((key.as_str(), value.as_str()))
                }
                other => positional.push_back(other),
            }
        }
        Self {
            cmd,
            positional,
            named,
        }
    }

    fn missing(&self, what: &str) -> String {
        format!("'{}' expects {what}", self.cmd)
    }

    fn raw(&mut self, what: &str) -> LineResult<(&'t str, bool)> {
        match self.positional.pop_front() {
            Some(Token::Word(w)) => Ok((w.as_str(), false)),
            Some(Token::Quoted(q)) => Ok((q.as_str(), true)),
            _ => Err(self.missing(what)),
        }
    }

    fn word(&mut self, what: &str) -> LineResult<String> {
        match self.raw(what)? {
            (w, false) => Ok(w.to_string()),
            (_, true) => Err(format!("'{}' expects {what}, not a quoted string", self.cmd)),
        }
    }

    fn text(&mut self, what: &str) -> LineResult<Text> {
        let (raw, _) = self.raw(what)?;
        Text::parse(raw)
    }

    fn joined_text(&mut self, what: &str) -> LineResult<Text> {
        self.optional_joined_text()?
            .ok_or_else(|| self.missing(what))
    }

    fn optional_joined_text(&mut self) -> LineResult<Option<Text>> {
        if self.positional.is_empty() {
            return Ok(None);
        }
        let mut parts = Vec::new();
        while let Some(tok) = self.positional.pop_front() {
            match tok {
                Token::Word(s) | Token::Quoted(s) => parts.push(s.clone()),
                Token::Named { key, value } => parts.push(format!("{key}={value}")),
                _ => return Err("unexpected token".into()),
            }
        }
        Text::parse(&parts.join(" ")).map(Some)
    }

    fn expr(&mut self, what: &str) -> LineResult<Expr> {
        self.optional_expr()?.ok_or_else(|| self.missing(what))
    }

    fn optional_expr(&mut self) -> LineResult<Option<Expr>> {
        match self.positional.pop_front() {
            None => Ok(None),
            Some(Token::Word(w)) => Expr::parse(w).map(Some),
            Some(Token::Quoted(q)) => Ok(Some(Expr::Text(Text::parse(q)?))),
            Some(_) => Err("unexpected token".into()),
        }
    }

    fn take_named(&mut self, key: &str) -> Option<&'t str> {
        let pos = self.named.iter().position(|(k, _)| *k == key)?;
        Some(self.named.remove(pos).1)
    }

    fn duration(&mut self, key: &str) -> LineResult<Option<Duration>> {
        self.take_named(key).map(parse_duration).transpose()
    }

    fn flag(&mut self, key: &str) -> LineResult<Option<bool>> {
        match self.take_named(key) {
            None => Ok(None),
            Some(raw) => parse_bool(raw)
                .map(Some)
                .ok_or_else(|| format!("{key}= expects true or false, got '{raw}'")),
        }
    }

    /// Reject anything not consumed.
    fn finish(self) -> LineResult {
        if let Some((key, _)) = self.named.first() {
            return Err(format!("unknown argument '{key}=' for '{}'", self.cmd));
        }
        if let Some(tok) = self.positional.front() {
            let shown = match tok {
                Token::Word(w) => w.clone(),
                Token::Quoted(q) => format!("\"{q}\""),
                _ => "?".into(),
            };
            return Err(format!("unexpected argument '{shown}' for '{}'", self.cmd));
        }
        Ok(())
    }
}
