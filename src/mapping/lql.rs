// src/mapping/lql.rs

//! LQL, the mapping transform expression language
//!
//! A small, total expression language evaluated against a source row
//! payload: column references (case-insensitive), single-quoted string
//! literals, numbers, booleans, a fixed set of scalar functions, and the
//! pipe operator: `v |> trim() |> upper()` is `upper(trim(v))`.
//!
//! Every function is null-safe. Missing columns evaluate to the empty
//! string; invalid dates pass through `dateFormat` unchanged.

use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// A parsed LQL expression, reusable across rows
#[derive(Debug, Clone, PartialEq)]
pub struct LqlExpression {
    root: Expr,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Column(String),
    StringLit(String),
    NumberLit(f64),
    BoolLit(bool),
    Call { name: String, args: Vec<Expr> },
}

impl LqlExpression {
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.expression()?;
        if parser.pos != parser.tokens.len() {
            return Err(Error::InvalidArgument(format!(
                "unexpected trailing input in LQL expression: {}",
                source
            )));
        }
        Ok(Self { root })
    }

    /// Evaluate against a source row payload
    pub fn evaluate(&self, payload: &Map<String, Value>) -> Result<Value> {
        eval(&self.root, payload)
    }
}

/// Parse and evaluate in one step
pub fn evaluate(source: &str, payload: &Map<String, Value>) -> Result<Value> {
    LqlExpression::parse(source)?.evaluate(payload)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    String(String),
    Number(f64),
    LParen,
    RParen,
    Comma,
    Pipe,
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '|' => {
                if chars.get(i + 1) == Some(&'>') {
                    tokens.push(Token::Pipe);
                    i += 2;
                } else {
                    return Err(Error::InvalidArgument(
                        "expected |> in LQL expression".to_string(),
                    ));
                }
            }
            '\'' => {
                let mut literal = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        // '' is an escaped quote inside the literal
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            literal.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            literal.push(ch);
                            i += 1;
                        }
                        None => {
                            return Err(Error::InvalidArgument(
                                "unterminated string literal in LQL expression".to_string(),
                            ));
                        }
                    }
                }
                tokens.push(Token::String(literal));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text.parse::<f64>().map_err(|_| {
                    Error::InvalidArgument(format!("bad number in LQL expression: {}", text))
                })?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unexpected character '{}' in LQL expression",
                    other
                )));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn expression(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            // The piped value becomes the first argument of the next call
            let Expr::Call { name, mut args } = self.primary()? else {
                return Err(Error::InvalidArgument(
                    "right side of |> must be a function call".to_string(),
                ));
            };
            args.insert(0, expr);
            expr = Expr::Call { name, args };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::String(s)) => Ok(Expr::StringLit(s)),
            Some(Token::Number(n)) => Ok(Expr::NumberLit(n)),
            Some(Token::Ident(name)) => {
                match name.to_lowercase().as_str() {
                    "true" => return Ok(Expr::BoolLit(true)),
                    "false" => return Ok(Expr::BoolLit(false)),
                    _ => {}
                }
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.expression()?);
                            match self.next() {
                                Some(Token::Comma) => continue,
                                Some(Token::RParen) => break,
                                _ => {
                                    return Err(Error::InvalidArgument(
                                        "expected ',' or ')' in LQL call".to_string(),
                                    ));
                                }
                            }
                        }
                    } else {
                        self.pos += 1;
                    }
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Column(name))
                }
            }
            other => Err(Error::InvalidArgument(format!(
                "unexpected token in LQL expression: {:?}",
                other
            ))),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }
}

fn eval(expr: &Expr, payload: &Map<String, Value>) -> Result<Value> {
    match expr {
        Expr::StringLit(s) => Ok(Value::from(s.clone())),
        Expr::NumberLit(n) => Ok(serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null)),
        Expr::BoolLit(b) => Ok(Value::from(*b)),
        Expr::Column(name) => Ok(payload
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| Value::from(""))),
        Expr::Call { name, args } => {
            let values = args
                .iter()
                .map(|a| eval(a, payload))
                .collect::<Result<Vec<_>>>()?;
            apply_function(name, &values)
        }
    }
}

fn apply_function(name: &str, args: &[Value]) -> Result<Value> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Null);
    match name.to_lowercase().as_str() {
        "upper" => Ok(map_string(arg(0), |s| s.to_uppercase())),
        "lower" => Ok(map_string(arg(0), |s| s.to_lowercase())),
        "trim" => Ok(map_string(arg(0), |s| s.trim().to_string())),
        "length" => Ok(Value::from(
            as_string(&arg(0)).map(|s| s.chars().count()).unwrap_or(0),
        )),
        "coalesce" => Ok(args
            .iter()
            .find(|v| !is_empty(v))
            .cloned()
            .unwrap_or(Value::from(""))),
        "concat" => {
            let mut out = String::new();
            for value in args {
                if let Some(s) = as_string(value) {
                    out.push_str(&s);
                }
            }
            Ok(Value::from(out))
        }
        "substring" => {
            let Some(s) = as_string(&arg(0)) else {
                return Ok(Value::Null);
            };
            let start = (as_number(&arg(1)).unwrap_or(1.0) as usize).max(1) - 1;
            let len = as_number(&arg(2)).unwrap_or(0.0).max(0.0) as usize;
            Ok(Value::from(
                s.chars().skip(start).take(len).collect::<String>(),
            ))
        }
        "left" => {
            let Some(s) = as_string(&arg(0)) else {
                return Ok(Value::Null);
            };
            let n = as_number(&arg(1)).unwrap_or(0.0).max(0.0) as usize;
            Ok(Value::from(s.chars().take(n).collect::<String>()))
        }
        "right" => {
            let Some(s) = as_string(&arg(0)) else {
                return Ok(Value::Null);
            };
            let n = as_number(&arg(1)).unwrap_or(0.0).max(0.0) as usize;
            let count = s.chars().count();
            Ok(Value::from(
                s.chars().skip(count.saturating_sub(n)).collect::<String>(),
            ))
        }
        "replace" => {
            let Some(s) = as_string(&arg(0)) else {
                return Ok(Value::Null);
            };
            let old = as_string(&arg(1)).unwrap_or_default();
            let new = as_string(&arg(2)).unwrap_or_default();
            if old.is_empty() {
                return Ok(Value::from(s));
            }
            Ok(Value::from(s.replace(&old, &new)))
        }
        "dateformat" => {
            let Some(s) = as_string(&arg(0)) else {
                return Ok(Value::Null);
            };
            let pattern = as_string(&arg(1)).unwrap_or_default();
            Ok(Value::from(format_date(&s, &pattern)))
        }
        other => Err(Error::InvalidArgument(format!(
            "unknown LQL function: {}",
            other
        ))),
    }
}

fn map_string(value: Value, f: impl FnOnce(&str) -> String) -> Value {
    match as_string(&value) {
        Some(s) => Value::from(f(&s)),
        None => Value::Null,
    }
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Reformat a date string; unparseable input passes through unchanged
fn format_date(input: &str, pattern: &str) -> String {
    use chrono::NaiveDate;

    let format = chrono_format(pattern);
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(input) {
        return dt.format(&format).to_string();
    }
    if let Ok(d) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return d.format(&format).to_string();
    }
    input.to_string()
}

/// Map a `yyyy-MM-dd HH:mm:ss` style pattern to chrono's format syntax
fn chrono_format(pattern: &str) -> String {
    pattern
        .replace("yyyy", "%Y")
        .replace("yy", "%y")
        .replace("MM", "%m")
        .replace("dd", "%d")
        .replace("HH", "%H")
        .replace("mm", "%M")
        .replace("ss", "%S")
}
