//! Reply decoder for the simulator's structured-text format
//!
//! The simulator emits replies in a superset of Lua table literals. Two
//! quirks drive the design here:
//!
//! 1. String payloads may contain the block's own delimiter characters
//!    (`{`, `}`, `[`, `]`, `=`, `,`). A pre-pass rewrites those characters
//!    inside string literals as decimal escapes before generic parsing.
//! 2. The wire format cannot represent arrays natively: every sequence
//!    degrades to a map keyed by a contiguous run of integers starting at 1.
//!    After parsing, such maps are collapsed back into ordered sequences,
//!    recursively.
//!
//! An empty or malformed reply decodes to [`Decoded::Failure`] rather than
//! an error, so callers can distinguish "the simulator returned nothing"
//! from "the simulator returned decodable emptiness" (`nil`, `{}`). The
//! decoder never touches a socket and is fuzz-tested in isolation.

use serde::{Deserialize, Serialize};

/// Table key: the wire format allows integer and string keys only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Key {
    Int(i64),
    Str(String),
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{i}"),
            Key::Str(s) => write!(f, "{s}"),
        }
    }
}

/// A decoded host value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Ordered sequence, recovered from a contiguous integer-keyed table.
    Seq(Vec<Value>),
    /// Key-value table in wire order.
    Table(Vec<(Key, Value)>),
}

impl Value {
    #[inline]
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(items) => Some(items),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_table(&self) -> Option<&[(Key, Value)]> {
        match self {
            Value::Table(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a string key in a table value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Table(entries) => entries.iter().find_map(|(k, v)| match k {
                Key::Str(s) if s == key => Some(v),
                _ => None,
            }),
            _ => None,
        }
    }

    /// Render this value in the wire format the simulator emits.
    ///
    /// Sequences are written with explicit integer keys, matching the wire
    /// degradation that `decode` reverses. Used by tests and by in-memory
    /// simulators; also handy for rendering template arguments.
    #[must_use]
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        self.write_wire(&mut out);
        out
    }

    fn write_wire(&self, out: &mut String) {
        match self {
            Value::Nil => out.push_str("nil"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&format!("{f:?}")),
            Value::Str(s) => write_wire_string(s, out),
            Value::Seq(items) => {
                out.push('{');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&format!(" [{}] = ", i + 1));
                    item.write_wire(out);
                }
                out.push_str(" }");
            }
            Value::Table(entries) => {
                out.push('{');
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    match key {
                        Key::Int(k) => out.push_str(&format!(" [{k}] = ")),
                        Key::Str(k) => {
                            out.push_str(" [");
                            write_wire_string(k, out);
                            out.push_str("] = ");
                        }
                    }
                    value.write_wire(out);
                }
                out.push_str(" }");
            }
        }
    }
}

fn write_wire_string(s: &str, out: &mut String) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('"');
}

/// Result of decoding one reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// The reply parsed to a host value.
    Value(Value),
    /// The reply was empty or malformed. Not an error: callers decide
    /// whether a decode failure means "no output" or "fatal".
    Failure(String),
}

impl Decoded {
    #[inline]
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Decoded::Value(v) => Some(v),
            Decoded::Failure(_) => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Decoded::Failure(_))
    }
}

/// Decode one raw reply body.
pub fn decode(raw: &str) -> Decoded {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Decoded::Failure("empty reply".to_string());
    }
    let escaped = escape_embedded_delimiters(trimmed);
    let mut parser = Parser::new(&escaped);
    let value = match parser.parse_value() {
        Ok(v) => v,
        Err(e) => return Decoded::Failure(e.to_string()),
    };
    parser.skip_whitespace();
    if !parser.at_end() {
        return Decoded::Failure(format!(
            "trailing input at byte {} of reply",
            parser.pos
        ));
    }
    Decoded::Value(collapse(value))
}

/// Characters that structure a table literal. Occurrences inside string
/// literals are rewritten as decimal escapes before parsing.
const DELIMITERS: &[char] = &['{', '}', '[', ']', '=', ','];

/// Pre-pass for decoding rule (a): neutralize delimiter characters that
/// appear inside string literals so the generic parser never sees them as
/// structure. Escape sequences already present are passed through intact.
fn escape_embedded_delimiters(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string: Option<char> = None;

    while let Some(ch) = chars.next() {
        match in_string {
            None => {
                if ch == '"' || ch == '\'' {
                    in_string = Some(ch);
                }
                out.push(ch);
            }
            Some(quote) => {
                if ch == '\\' {
                    out.push(ch);
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else if ch == quote {
                    in_string = None;
                    out.push(ch);
                } else if DELIMITERS.contains(&ch) {
                    // Zero-padded to three digits so a literal digit that
                    // follows the delimiter cannot extend the escape.
                    out.push_str(&format!("\\{:03}", ch as u32));
                } else {
                    out.push(ch);
                }
            }
        }
    }
    out
}

/// Decoding rule (b): bottom-up, turn every table whose keys are exactly
/// the contiguous integers `1..=n` into an ordered sequence in key order.
fn collapse(value: Value) -> Value {
    match value {
        Value::Seq(items) => Value::Seq(items.into_iter().map(collapse).collect()),
        Value::Table(entries) => {
            let entries: Vec<(Key, Value)> = entries
                .into_iter()
                .map(|(k, v)| (k, collapse(v)))
                .collect();
            if entries.is_empty() {
                return Value::Table(entries);
            }
            let mut indexed: Vec<(i64, usize)> = Vec::with_capacity(entries.len());
            for (pos, (key, _)) in entries.iter().enumerate() {
                match key {
                    Key::Int(i) => indexed.push((*i, pos)),
                    Key::Str(_) => return Value::Table(entries),
                }
            }
            indexed.sort_by_key(|(i, _)| *i);
            let contiguous = indexed
                .iter()
                .enumerate()
                .all(|(offset, (i, _))| *i == offset as i64 + 1);
            if !contiguous {
                return Value::Table(entries);
            }
            let mut entries: Vec<Option<(Key, Value)>> =
                entries.into_iter().map(Some).collect();
            let items = indexed
                .into_iter()
                .map(|(_, pos)| entries[pos].take().map(|(_, v)| v))
                .collect::<Option<Vec<Value>>>();
            match items {
                Some(items) => Value::Seq(items),
                // Duplicate integer keys; leave as a table.
                None => Value::Table(
                    entries.into_iter().flatten().collect(),
                ),
            }
        }
        scalar => scalar,
    }
}

#[derive(Debug, thiserror::Error)]
enum ParseError {
    #[error("unexpected end of reply")]
    UnexpectedEnd,
    #[error("unexpected character {ch:?} at byte {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("invalid number literal {0:?}")]
    InvalidNumber(String),
    #[error("invalid escape sequence {0:?}")]
    InvalidEscape(String),
    #[error("unknown word {0:?}")]
    UnknownWord(String),
}

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    _raw: &'a str,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            _raw: input,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, want: char) -> Result<(), ParseError> {
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => Err(ParseError::UnexpectedChar {
                ch: c,
                pos: self.pos - 1,
            }),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn parse_value(&mut self) -> Result<Value, ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some('{') => self.parse_table(),
            Some('"') | Some('\'') => Ok(Value::Str(self.parse_string()?)),
            Some(_) => self.parse_word(),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn parse_table(&mut self) -> Result<Value, ParseError> {
        self.expect('{')?;
        let mut entries: Vec<(Key, Value)> = Vec::new();
        let mut next_implicit: i64 = 1;
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('}') => {
                    self.pos += 1;
                    return Ok(Value::Table(entries));
                }
                Some('[') => {
                    self.pos += 1;
                    let key = self.parse_key()?;
                    self.skip_whitespace();
                    self.expect(']')?;
                    self.skip_whitespace();
                    self.expect('=')?;
                    let value = self.parse_value()?;
                    entries.push((key, value));
                }
                Some(c) if is_ident_start(c) => {
                    // Either `name = value` or a bare word value
                    // (nil/true/false). Try the key form first.
                    let start = self.pos;
                    let ident = self.take_ident();
                    self.skip_whitespace();
                    if self.peek() == Some('=') {
                        self.pos += 1;
                        let value = self.parse_value()?;
                        entries.push((Key::Str(ident), value));
                    } else {
                        self.pos = start;
                        let value = self.parse_value()?;
                        entries.push((Key::Int(next_implicit), value));
                        next_implicit += 1;
                    }
                }
                Some(_) => {
                    let value = self.parse_value()?;
                    entries.push((Key::Int(next_implicit), value));
                    next_implicit += 1;
                }
                None => return Err(ParseError::UnexpectedEnd),
            }
            self.skip_whitespace();
            match self.peek() {
                Some(',') | Some(';') => {
                    self.pos += 1;
                }
                Some('}') => {}
                Some(c) => {
                    return Err(ParseError::UnexpectedChar { ch: c, pos: self.pos });
                }
                None => return Err(ParseError::UnexpectedEnd),
            }
        }
    }

    fn parse_key(&mut self) -> Result<Key, ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some('"') | Some('\'') => Ok(Key::Str(self.parse_string()?)),
            Some(_) => match self.parse_word()? {
                Value::Int(i) => Ok(Key::Int(i)),
                other => Err(ParseError::UnknownWord(format!("{other:?}"))),
            },
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn parse_string(&mut self) -> Result<String, ParseError> {
        let quote = self.bump().ok_or(ParseError::UnexpectedEnd)?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(out),
                Some('\\') => out.push(self.parse_escape()?),
                Some(c) => out.push(c),
                None => return Err(ParseError::UnexpectedEnd),
            }
        }
    }

    fn parse_escape(&mut self) -> Result<char, ParseError> {
        match self.bump() {
            Some('n') => Ok('\n'),
            Some('r') => Ok('\r'),
            Some('t') => Ok('\t'),
            Some('\\') => Ok('\\'),
            Some('"') => Ok('"'),
            Some('\'') => Ok('\''),
            Some(d) if d.is_ascii_digit() => {
                // Lua-style decimal escape, up to three digits.
                let mut code = d.to_digit(10).unwrap_or(0);
                for _ in 0..2 {
                    match self.peek() {
                        Some(d2) if d2.is_ascii_digit() => {
                            code = code * 10 + d2.to_digit(10).unwrap_or(0);
                            self.pos += 1;
                        }
                        _ => break,
                    }
                }
                char::from_u32(code)
                    .ok_or_else(|| ParseError::InvalidEscape(format!("\\{code}")))
            }
            Some(c) => Err(ParseError::InvalidEscape(format!("\\{c}"))),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn take_ident(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                out.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        out
    }

    fn parse_word(&mut self) -> Result<Value, ParseError> {
        let start = self.pos;
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || DELIMITERS.contains(&c) || c == ';' {
                break;
            }
            word.push(c);
            self.pos += 1;
        }
        if word.is_empty() {
            return match self.peek() {
                Some(c) => Err(ParseError::UnexpectedChar { ch: c, pos: start }),
                None => Err(ParseError::UnexpectedEnd),
            };
        }
        match word.as_str() {
            "nil" => Ok(Value::Nil),
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => {
                let has_float_marker =
                    word.contains('.') || word.contains('e') || word.contains('E');
                if !has_float_marker {
                    if let Ok(i) = word.parse::<i64>() {
                        return Ok(Value::Int(i));
                    }
                }
                if let Ok(f) = word.parse::<f64>() {
                    if f.is_finite() {
                        return Ok(Value::Float(f));
                    }
                    return Err(ParseError::InvalidNumber(word));
                }
                if word.chars().next().is_some_and(|c| {
                    c.is_ascii_digit() || c == '-' || c == '+' || c == '.'
                }) {
                    Err(ParseError::InvalidNumber(word))
                } else {
                    Err(ParseError::UnknownWord(word))
                }
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}
