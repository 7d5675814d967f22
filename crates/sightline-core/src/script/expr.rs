//! Right-hand sides of assignments and numeric arguments.
//!
//! ```text
//! expr  := term (('+' | '-') term)*
//! term  := unary (('*' | '/' | '%') unary)*
//! unary := '-' unary | atom
//! atom  := NUMBER | "string" | NAME | ${NAME} | '(' expr ')'
//! ```
//!
//! `+` adds two numbers and concatenates anything else. The other operators
//! need numeric operands; text that holds a number counts as one.

use std::fmt;

use super::text::Text;
use crate::error::{Error, Result};
use crate::vars::{is_valid_name, Value, VariableStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn symbol(self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
            BinaryOp::Rem => '%',
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(Text),
    Var(String),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn parse(src: &str) -> std::result::Result<Expr, String> {
        let tokens = lex(src)?;
        if tokens.is_empty() {
            return Err("expected an expression".into());
        }
        let mut parser = ExprParser { tokens, pos: 0 };
        let expr = parser.expr()?;
        if let Some(tok) = parser.tokens.get(parser.pos) {
            return Err(format!("unexpected '{tok}' in expression"));
        }
        Ok(expr)
    }

    /// Whether the expression references no variables.
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Number(_) => true,
            Expr::Text(t) => t.variables().next().is_none(),
            Expr::Var(_) => false,
            Expr::Neg(inner) => inner.is_constant(),
            Expr::Binary(_, l, r) => l.is_constant() && r.is_constant(),
        }
    }

    pub fn eval(&self, vars: &VariableStore) -> Result<Value> {
        match self {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Text(t) => Ok(Value::Text(t.render(vars)?)),
            Expr::Var(name) => vars.get(name),
            Expr::Neg(inner) => {
                let v = inner.eval(vars)?;
                Ok(Value::Number(-numeric(&v, '-')?))
            }
            Expr::Binary(op, l, r) => apply(*op, l.eval(vars)?, r.eval(vars)?),
        }
    }

    /// Evaluate to a non-negative whole number, e.g. a repeat count.
    pub fn eval_count(&self, vars: &VariableStore) -> Result<u32> {
        let value = self.eval(vars)?;
        match value.as_number() {
            Some(n) if n >= 0.0 && n.fract() == 0.0 && n <= f64::from(u32::MAX) => Ok(n as u32),
            _ => Err(Error::Expression(format!(
                "expected a non-negative whole number, got '{value}'"
            ))),
        }
    }

    pub fn eval_number(&self, vars: &VariableStore) -> Result<f64> {
        let value = self.eval(vars)?;
        value
            .as_number()
            .ok_or_else(|| Error::Expression(format!("expected a number, got '{value}'")))
    }
}

fn numeric(v: &Value, op: char) -> Result<f64> {
    v.as_number()
        .ok_or_else(|| Error::Expression(format!("cannot apply '{op}' to '{v}'")))
}

fn apply(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    if op == BinaryOp::Add {
        return Ok(match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            _ => Value::Text(format!("{l}{r}")),
        });
    }
    let a = numeric(&l, op.symbol())?;
    let b = numeric(&r, op.symbol())?;
    let n = match op {
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => {
            return Err(Error::Expression(format!("division by zero in '{l} {} {r}'", op.symbol())))
        }
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        BinaryOp::Add => a + b,
    };
    Ok(Value::Number(n))
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Number(f64),
    Str(String),
    Name(String),
    Op(char),
    LParen,
    RParen,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Number(n) => write!(f, "{n}"),
            Tok::Str(s) => write!(f, "\"{s}\""),
            Tok::Name(n) => f.write_str(n),
            Tok::Op(c) => write!(f, "{c}"),
            Tok::LParen => f.write_str("("),
            Tok::RParen => f.write_str(")"),
        }
    }
}

fn lex(src: &str) -> std::result::Result<Vec<Tok>, String> {
    let mut out = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '#' => break,
            '+' | '-' | '*' | '/' | '%' => {
                out.push(Tok::Op(c));
                i += 1;
            }
            '(' => {
                out.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                out.push(Tok::RParen);
                i += 1;
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                let mut closed = false;
                while i < chars.len() {
                    match chars[i] {
                        '"' => {
                            closed = true;
                            i += 1;
                            break;
                        }
                        '\\' if i + 1 < chars.len() => {
                            i += 1;
                            s.push(match chars[i] {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            });
                        }
                        other => s.push(other),
                    }
                    i += 1;
                }
                if !closed {
                    return Err("unterminated string".into());
                }
                out.push(Tok::Str(s));
            }
            '$' => {
                if chars.get(i + 1) != Some(&'{') {
                    return Err("expected '{' after '$'".into());
                }
                let start = i + 2;
                let end = chars[start..]
                    .iter()
                    .position(|&c| c == '}')
                    .map(|p| start + p)
                    .ok_or("unterminated '${'")?;
                let name: String = chars[start..end].iter().collect::<String>().trim().to_string();
                if !is_valid_name(&name) {
                    return Err(format!("invalid variable name '{name}'"));
                }
                out.push(Tok::Name(name));
                i = end + 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let lit: String = chars[start..i].iter().collect();
                let n = lit
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{lit}'"))?;
                out.push(Tok::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                out.push(Tok::Name(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{other}' in expression")),
        }
    }
    Ok(out)
}

struct ExprParser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expr(&mut self) -> std::result::Result<Expr, String> {
        let mut lhs = self.term()?;
        while let Some(Tok::Op(c @ ('+' | '-'))) = self.peek() {
            let op = if *c == '+' { BinaryOp::Add } else { BinaryOp::Sub };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> std::result::Result<Expr, String> {
        let mut lhs = self.unary()?;
        while let Some(Tok::Op(c @ ('*' | '/' | '%'))) = self.peek() {
            let op = match c {
                '*' => BinaryOp::Mul,
                '/' => BinaryOp::Div,
                _ => BinaryOp::Rem,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> std::result::Result<Expr, String> {
        if let Some(Tok::Op('-')) = self.peek() {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> std::result::Result<Expr, String> {
        match self.next() {
            Some(Tok::Number(n)) => Ok(Expr::Number(n)),
            Some(Tok::Str(s)) => Ok(Expr::Text(Text::parse(&s)?)),
            Some(Tok::Name(name)) => Ok(Expr::Var(name)),
            Some(Tok::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Tok::RParen) => Ok(inner),
                    _ => Err("expected ')'".into()),
                }
            }
            Some(tok) => Err(format!("unexpected '{tok}' in expression")),
            None => Err("expression ends unexpectedly".into()),
        }
    }
}
