//! Literal-only decoding of action inputs.
//!
//! Models are prompted to write action inputs as Python-style literals
//! (`{'a': 2, 'b': 2}`, `['x', 1]`, `'text'`, `True`, `None`). This module
//! turns that text into a [`serde_json::Value`] without evaluating anything:
//! names, calls, attribute access, subscripts and operators are all rejected.
//!
//! JSON is a subset of the accepted syntax, so inputs rendered back into a
//! prompt with `Value::to_string` decode to the same value.

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Maximum container nesting accepted before giving up.
const MAX_DEPTH: usize = 64;

/// Why an action input could not be decoded as a literal.
///
/// Offsets are byte offsets into the trimmed input text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty action input")]
    Empty,

    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("unexpected character {found:?} at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },

    #[error("non-literal expression `{name}` at offset {offset}")]
    NonLiteral { name: String, offset: usize },

    #[error("invalid number `{text}` at offset {offset}")]
    InvalidNumber { text: String, offset: usize },

    #[error("invalid escape sequence at offset {offset}")]
    InvalidEscape { offset: usize },

    #[error("unterminated string starting at offset {offset}")]
    UnterminatedString { offset: usize },

    #[error("unsupported mapping key at offset {offset}")]
    InvalidKey { offset: usize },

    #[error("unhashable set element at offset {offset}")]
    UnhashableElement { offset: usize },

    #[error("literal nested deeper than {} levels", MAX_DEPTH)]
    TooDeep,

    #[error("unexpected trailing input at offset {offset}")]
    TrailingInput { offset: usize },
}

/// Decodes literal text into a JSON value.
///
/// Accepted forms:
/// - integers (`42`, `-7`, `1_000`, `0x1f`, `0o17`, `0b101`) and floats
///   (`3.5`, `.5`, `1e-3`); integers outside the 64-bit range decode as the
///   nearest float
/// - strings in single, double or triple quotes, optionally `r`/`u`
///   prefixed, with adjacent literals concatenated
/// - `True`/`False`/`None` and their JSON spellings
/// - lists, tuples and sets (all decoded as arrays) and dicts (objects);
///   set elements must be hashable (no lists, dicts or sets inside) and
///   dict keys must be scalars
/// - a bare top-level tuple such as `'a', 1`
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralDecoder;

impl LiteralDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode `text` as a single literal value.
    pub fn decode(&self, text: &str) -> Result<Value, DecodeError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DecodeError::Empty);
        }

        let mut cursor = Cursor::new(text);
        let first = cursor.parse_value()?;
        cursor.skip_ws();

        // `literal_eval("1, 2")` yields a tuple; mirror that at the top level.
        let value = if cursor.peek() == Some(',') {
            let mut items = vec![first];
            while cursor.eat(',') {
                cursor.skip_ws();
                if cursor.is_at_end() {
                    break;
                }
                items.push(cursor.parse_value()?);
                cursor.skip_ws();
            }
            Value::Array(items)
        } else {
            first
        };

        cursor.skip_ws();
        if !cursor.is_at_end() {
            return Err(DecodeError::TrailingInput { offset: cursor.pos });
        }
        Ok(value)
    }
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
    /// Lists, dicts and sets opened so far; none of them may sit in a set.
    mutable_opened: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            depth: 0,
            mutable_opened: 0,
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn unexpected(&self) -> DecodeError {
        match self.peek() {
            Some(found) => DecodeError::UnexpectedChar {
                found,
                offset: self.pos,
            },
            None => DecodeError::UnexpectedEnd,
        }
    }

    fn enter(&mut self) -> Result<(), DecodeError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(DecodeError::TooDeep);
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_value(&mut self) -> Result<Value, DecodeError> {
        self.skip_ws();
        match self.peek() {
            None => Err(DecodeError::UnexpectedEnd),
            Some('[') => {
                self.enter()?;
                self.mutable_opened += 1;
                self.bump();
                let items = self.parse_items(']')?;
                self.leave();
                Ok(Value::Array(items))
            }
            Some('(') => self.parse_tuple(),
            Some('{') => self.parse_braces(),
            Some('\'') | Some('"') => self.parse_strings(),
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => {
                self.parse_number()
            }
            Some(c) if c.is_alphabetic() || c == '_' => self.parse_word(),
            Some(_) => Err(self.unexpected()),
        }
    }

    /// Comma separated values up to `close`; the opening bracket is consumed.
    fn parse_items(&mut self, close: char) -> Result<Vec<Value>, DecodeError> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(close) {
                return Ok(items);
            }
            items.push(self.parse_value()?);
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            if self.eat(close) {
                return Ok(items);
            }
            return Err(self.unexpected());
        }
    }

    fn parse_tuple(&mut self) -> Result<Value, DecodeError> {
        self.enter()?;
        self.bump();
        self.skip_ws();

        if self.eat(')') {
            self.leave();
            return Ok(Value::Array(Vec::new()));
        }

        let first = self.parse_value()?;
        self.skip_ws();
        let value = if self.eat(')') {
            // Parenthesised expression, not a tuple.
            first
        } else if self.eat(',') {
            let mut items = vec![first];
            items.extend(self.parse_items(')')?);
            Value::Array(items)
        } else {
            return Err(self.unexpected());
        };

        self.leave();
        Ok(value)
    }

    /// `{}`, `{k: v, ...}` or a set `{a, b}`.
    fn parse_braces(&mut self) -> Result<Value, DecodeError> {
        self.enter()?;
        self.mutable_opened += 1;
        self.bump();
        self.skip_ws();

        if self.eat('}') {
            self.leave();
            return Ok(Value::Object(Map::new()));
        }

        let key_offset = self.pos;
        let opened = self.mutable_opened;
        let first = self.parse_value()?;
        let first_hashable = self.mutable_opened == opened;
        self.skip_ws();

        let value = if self.eat(':') {
            let mut map = Map::new();
            let first_value = self.parse_value()?;
            map.insert(mapping_key(first, key_offset)?, first_value);
            loop {
                self.skip_ws();
                if self.eat('}') {
                    break;
                }
                if !self.eat(',') {
                    return Err(self.unexpected());
                }
                self.skip_ws();
                if self.eat('}') {
                    break;
                }
                let key_offset = self.pos;
                let key = self.parse_value()?;
                self.skip_ws();
                if !self.eat(':') {
                    return Err(self.unexpected());
                }
                let value = self.parse_value()?;
                map.insert(mapping_key(key, key_offset)?, value);
            }
            Value::Object(map)
        } else if self.eat(',') {
            if !first_hashable {
                return Err(DecodeError::UnhashableElement { offset: key_offset });
            }
            let mut items = vec![first];
            loop {
                self.skip_ws();
                if self.eat('}') {
                    break;
                }
                let offset = self.pos;
                let opened = self.mutable_opened;
                items.push(self.parse_value()?);
                if self.mutable_opened != opened {
                    return Err(DecodeError::UnhashableElement { offset });
                }
                self.skip_ws();
                if self.eat(',') {
                    continue;
                }
                if self.eat('}') {
                    break;
                }
                return Err(self.unexpected());
            }
            Value::Array(items)
        } else if self.eat('}') {
            if !first_hashable {
                return Err(DecodeError::UnhashableElement { offset: key_offset });
            }
            Value::Array(vec![first])
        } else {
            return Err(self.unexpected());
        };

        self.leave();
        Ok(value)
    }

    /// One or more adjacent string literals, concatenated.
    fn parse_strings(&mut self) -> Result<Value, DecodeError> {
        let mut out = self.parse_string(false)?;
        loop {
            let checkpoint = self.pos;
            self.skip_ws();
            match self.peek() {
                Some('\'') | Some('"') => out.push_str(&self.parse_string(false)?),
                Some(c) if is_string_prefix(c) && matches!(self.peek_nth(1), Some('\'' | '"')) => {
                    self.bump();
                    out.push_str(&self.parse_string(c == 'r' || c == 'R')?);
                }
                _ => {
                    self.pos = checkpoint;
                    return Ok(Value::String(out));
                }
            }
        }
    }

    fn parse_string(&mut self, raw: bool) -> Result<String, DecodeError> {
        let start = self.pos;
        let quote = self.bump().ok_or(DecodeError::UnexpectedEnd)?;
        let triple = self.peek() == Some(quote) && self.peek_nth(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut out = String::new();
        loop {
            let c = self
                .bump()
                .ok_or(DecodeError::UnterminatedString { offset: start })?;

            if c == quote {
                if !triple {
                    return Ok(out);
                }
                if self.peek() == Some(quote) && self.peek_nth(1) == Some(quote) {
                    self.bump();
                    self.bump();
                    return Ok(out);
                }
                out.push(c);
                continue;
            }

            match c {
                '\n' if !triple => return Err(DecodeError::UnterminatedString { offset: start }),
                '\\' if raw => {
                    // Raw strings keep the backslash but still cannot end on an escaped quote.
                    out.push('\\');
                    if let Some(next) = self.bump() {
                        out.push(next);
                    }
                }
                '\\' => self.parse_escape(&mut out)?,
                other => out.push(other),
            }
        }
    }

    fn parse_escape(&mut self, out: &mut String) -> Result<(), DecodeError> {
        let offset = self.pos - 1;
        let c = self.bump().ok_or(DecodeError::UnexpectedEnd)?;
        match c {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\u{07}'),
            'b' => out.push('\u{08}'),
            'f' => out.push('\u{0c}'),
            'v' => out.push('\u{0b}'),
            'x' => out.push(self.parse_hex_escape(2, offset)?),
            'u' => out.push(self.parse_hex_escape(4, offset)?),
            'U' => out.push(self.parse_hex_escape(8, offset)?),
            '0'..='7' => {
                let mut code = c.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match self.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            code = code * 8 + d;
                            self.bump();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(code).ok_or(DecodeError::InvalidEscape { offset })?);
            }
            'N' => return Err(DecodeError::InvalidEscape { offset }),
            other => {
                // Unknown escapes are kept verbatim.
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    fn parse_hex_escape(&mut self, digits: usize, offset: usize) -> Result<char, DecodeError> {
        let end = self.pos + digits;
        let hex = self
            .src
            .get(self.pos..end)
            .ok_or(DecodeError::InvalidEscape { offset })?;
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DecodeError::InvalidEscape { offset });
        }
        let code = u32::from_str_radix(hex, 16).map_err(|_| DecodeError::InvalidEscape { offset })?;
        self.pos = end;
        char::from_u32(code).ok_or(DecodeError::InvalidEscape { offset })
    }

    fn parse_number(&mut self) -> Result<Value, DecodeError> {
        let start = self.pos;
        let negative = match self.peek() {
            Some('-') => {
                self.bump();
                true
            }
            Some('+') => {
                self.bump();
                false
            }
            _ => false,
        };
        self.skip_ws();

        let digits_start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_digit() || c == '.' => {}
            Some(c) if c.is_alphabetic() || c == '_' => {
                // `-inf`, `-x`: a sign on something that is not a number literal.
                return Err(self.non_literal(digits_start));
            }
            _ => return Err(self.unexpected()),
        }

        let radix = match (self.peek(), self.peek_nth(1)) {
            (Some('0'), Some('x' | 'X')) => Some(16),
            (Some('0'), Some('o' | 'O')) => Some(8),
            (Some('0'), Some('b' | 'B')) => Some(2),
            _ => None,
        };

        if let Some(radix) = radix {
            self.bump();
            self.bump();
            let body_start = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
                self.bump();
            }
            let text = &self.src[start..self.pos];
            let body: String = self.src[body_start..self.pos]
                .chars()
                .filter(|c| *c != '_')
                .collect();
            let invalid = || DecodeError::InvalidNumber {
                text: text.to_string(),
                offset: start,
            };
            if body.is_empty() || !body.chars().all(|c| c.is_digit(radix)) {
                return Err(invalid());
            }
            if let Ok(magnitude) = i64::from_str_radix(&body, radix) {
                return Ok(Value::Number(Number::from(if negative {
                    -magnitude
                } else {
                    magnitude
                })));
            }
            let magnitude = body
                .chars()
                .filter_map(|c| c.to_digit(radix))
                .fold(0f64, |acc, d| acc * f64::from(radix) + f64::from(d));
            return Number::from_f64(if negative { -magnitude } else { magnitude })
                .map(Value::Number)
                .ok_or_else(invalid);
        }

        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' | '_' => {}
                '.' => is_float = true,
                'e' | 'E' => {
                    is_float = true;
                    if matches!(self.peek_nth(1), Some('+' | '-')) {
                        self.bump();
                    }
                }
                _ => break,
            }
            self.bump();
        }

        let text = &self.src[start..self.pos];
        let invalid = || DecodeError::InvalidNumber {
            text: text.to_string(),
            offset: start,
        };

        // `1j` (complex) or `12abc` are not plain numbers.
        if matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            return Err(invalid());
        }

        let body: String = self.src[digits_start..self.pos]
            .chars()
            .filter(|c| *c != '_')
            .collect();
        let signed = if negative {
            format!("-{body}")
        } else {
            body
        };

        if is_float {
            let parsed: f64 = signed.parse().map_err(|_| invalid())?;
            return Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or_else(invalid);
        }
        if let Ok(n) = signed.parse::<i64>() {
            return Ok(Value::Number(Number::from(n)));
        }
        if let Ok(n) = signed.parse::<u64>() {
            return Ok(Value::Number(Number::from(n)));
        }
        signed
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(invalid)
    }

    fn parse_word(&mut self) -> Result<Value, DecodeError> {
        let start = self.pos;
        if let Some(c) = self.peek() {
            if is_string_prefix(c) && matches!(self.peek_nth(1), Some('\'' | '"')) {
                self.bump();
                let first = self.parse_string(c == 'r' || c == 'R')?;
                return self.continue_strings(first);
            }
        }

        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        match &self.src[start..self.pos] {
            "True" | "true" => Ok(Value::Bool(true)),
            "False" | "false" => Ok(Value::Bool(false)),
            "None" | "null" => Ok(Value::Null),
            _ => Err(self.non_literal(start)),
        }
    }

    /// Continue concatenating string literals after a prefixed first literal.
    fn continue_strings(&mut self, first: String) -> Result<Value, DecodeError> {
        let checkpoint = self.pos;
        self.skip_ws();
        if matches!(self.peek(), Some('\'' | '"')) {
            match self.parse_strings()? {
                Value::String(rest) => Ok(Value::String(first + &rest)),
                other => Ok(other),
            }
        } else {
            self.pos = checkpoint;
            Ok(Value::String(first))
        }
    }

    fn non_literal(&mut self, start: usize) -> DecodeError {
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        let name = if self.pos > start {
            self.src[start..self.pos].to_string()
        } else {
            self.peek().map(String::from).unwrap_or_default()
        };
        DecodeError::NonLiteral {
            name,
            offset: start,
        }
    }
}

/// `u'..'` and `r'..'` are plain strings; `b'..'` and `f'..'` are not accepted.
fn is_string_prefix(c: char) -> bool {
    matches!(c, 'r' | 'R' | 'u' | 'U')
}

fn mapping_key(key: Value, offset: usize) -> Result<String, DecodeError> {
    match key {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(true) => Ok("True".to_string()),
        Value::Bool(false) => Ok("False".to_string()),
        Value::Null => Ok("None".to_string()),
        Value::Array(_) | Value::Object(_) => Err(DecodeError::InvalidKey { offset }),
    }
}
