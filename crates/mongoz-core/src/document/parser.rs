//! Parser for the shell document-expression grammar
//!
//! Accepts JSON plus the relaxations the database shell allows: bare keys,
//! single-quoted strings, trailing commas, and the literal constructors
//! `ObjectId(..)`, `ISODate(..)`, `new Date(..)`, `NumberLong(..)`,
//! `NumberInt(..)`, `NumberDecimal(..)` and `BinData(..)`. Objects shaped like
//! an Extended JSON wrapper (`{"$oid": ..}`, `{"$date": ..}`, ...) collapse to
//! the value they wrap.

use crate::ParseError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bson::oid::ObjectId;
use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Document};
use chrono::{DateTime, NaiveDate, Utc};

type ParseResult<T> = std::result::Result<T, ParseError>;

/// Deepest value nesting accepted
const MAX_DEPTH: usize = 200;

/// Single-key wrappers recognized as Extended JSON values
const WRAPPER_KEYS: &[&str] = &[
    "$oid",
    "$date",
    "$numberInt",
    "$numberLong",
    "$numberDouble",
    "$numberDecimal",
    "$binary",
    "$uuid",
    "$regularExpression",
    "$timestamp",
    "$minKey",
    "$maxKey",
    "$undefined",
    "$code",
    "$symbol",
    "$dbPointer",
];

/// Parse one complete value; trailing input is an error.
pub(crate) fn parse_value(text: &str) -> ParseResult<Bson> {
    let mut parser = Parser::new(text);
    parser.skip_whitespace();
    let value = parser.value()?;
    parser.skip_whitespace();
    if let Some(c) = parser.peek() {
        return Err(parser.error(format!("unexpected trailing character '{}'", c)));
    }
    Ok(value)
}

/// Parse one complete document expression.
pub(crate) fn parse_document(text: &str) -> ParseResult<Document> {
    match parse_value(text)? {
        Bson::Document(doc) => Ok(doc),
        other => Err(ParseError::new(
            format!("expected a document, found {:?}", other.element_type()),
            0,
        )),
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            depth: 0,
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.pos)
    }

    fn error_at(&self, message: impl Into<String>, offset: usize) -> ParseError {
        ParseError::new(message, offset)
    }

    fn skip_whitespace(&mut self) {
        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();

            if trimmed.starts_with("//") {
                let end = trimmed.find('\n').unwrap_or(trimmed.len());
                self.pos += end;
            } else if trimmed.starts_with("/*") {
                match trimmed[2..].find("*/") {
                    Some(end) => self.pos += end + 4,
                    None => self.pos = self.src.len(),
                }
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, expected: char) -> ParseResult<()> {
        self.skip_whitespace();
        match self.peek() {
            Some(c) if c == expected => {
                self.bump();
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected '{}', found '{}'", expected, c))),
            None => Err(self.error(format!("expected '{}', found end of input", expected))),
        }
    }

    fn value(&mut self) -> ParseResult<Bson> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        let value = self.nested_value();
        self.depth -= 1;
        value
    }

    fn nested_value(&mut self) -> ParseResult<Bson> {
        self.skip_whitespace();
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some('{') => self.object(),
            Some('[') => self.array(),
            Some('"') | Some('\'') => self.string().map(Bson::String),
            Some(c) if c == '-' || c == '.' || c.is_ascii_digit() => self.number(),
            Some(c) if is_ident_start(c) => self.literal(),
            Some(c) => Err(self.error(format!("unexpected character '{}'", c))),
        }
    }

    fn object(&mut self) -> ParseResult<Bson> {
        let start = self.pos;
        self.expect('{')?;
        let mut doc = Document::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('}') => {
                    self.bump();
                    break;
                }
                None => return Err(self.error("unterminated object")),
                _ => {}
            }

            self.skip_whitespace();
            let key_at = self.pos;
            let key = self.key()?;
            if doc.contains_key(&key) {
                return Err(self.error_at(format!("duplicate field name '{}'", key), key_at));
            }
            self.expect(':')?;
            let value = self.value()?;
            doc.insert(key, value);

            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some('}') => break,
                Some(c) => {
                    return Err(self.error_at(
                        format!("expected ',' or '}}', found '{}'", c),
                        self.pos - c.len_utf8(),
                    ));
                }
                None => return Err(self.error("unterminated object")),
            }
        }

        if let Some(body) = doc.get("$date").filter(|_| doc.len() == 1) {
            let millis = match body {
                Bson::Int32(n) => Some(i64::from(*n)),
                Bson::Int64(n) => Some(*n),
                Bson::Double(n) if n.is_finite() => Some(*n as i64),
                Bson::String(text) => parse_date_text(text),
                Bson::DateTime(dt) => Some(dt.timestamp_millis()),
                _ => None,
            };
            return millis
                .map(|ms| Bson::DateTime(bson::DateTime::from_millis(ms)))
                .ok_or_else(|| self.error_at("invalid $date value", start));
        }
        if is_extjson_wrapper(&doc) {
            let json = Bson::Document(doc).into_canonical_extjson();
            return Bson::try_from(json)
                .map_err(|e| self.error_at(format!("invalid extended JSON value: {}", e), start));
        }
        Ok(Bson::Document(doc))
    }

    fn array(&mut self) -> ParseResult<Bson> {
        self.expect('[')?;
        let mut items = Vec::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(']') => {
                    self.bump();
                    break;
                }
                None => return Err(self.error("unterminated array")),
                _ => {}
            }

            items.push(self.value()?);

            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some(']') => break,
                Some(c) => {
                    return Err(self.error_at(
                        format!("expected ',' or ']', found '{}'", c),
                        self.pos - c.len_utf8(),
                    ));
                }
                None => return Err(self.error("unterminated array")),
            }
        }

        Ok(Bson::Array(items))
    }

    fn key(&mut self) -> ParseResult<String> {
        self.skip_whitespace();
        match self.peek() {
            Some('"') | Some('\'') => self.string(),
            Some(c) if is_ident_start(c) => {
                let start = self.pos;
                while matches!(self.peek(), Some(c) if is_ident_char(c) || c == '.') {
                    self.bump();
                }
                Ok(self.src[start..self.pos].to_string())
            }
            Some(c) => Err(self.error(format!("expected a field name, found '{}'", c))),
            None => Err(self.error("expected a field name, found end of input")),
        }
    }

    fn string(&mut self) -> ParseResult<String> {
        let start = self.pos;
        let quote = match self.bump() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.error_at("expected a string", start)),
        };
        let mut out = String::new();

        loop {
            match self.bump() {
                None => return Err(self.error_at("unterminated string", start)),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => {
                    let escape_at = self.pos - 1;
                    match self.bump() {
                        Some('"') => out.push('"'),
                        Some('\'') => out.push('\''),
                        Some('\\') => out.push('\\'),
                        Some('/') => out.push('/'),
                        Some('b') => out.push('\u{0008}'),
                        Some('f') => out.push('\u{000C}'),
                        Some('n') => out.push('\n'),
                        Some('r') => out.push('\r'),
                        Some('t') => out.push('\t'),
                        Some('u') => out.push(self.unicode_escape(escape_at)?),
                        Some(c) => {
                            return Err(
                                self.error_at(format!("invalid escape '\\{}'", c), escape_at)
                            );
                        }
                        None => return Err(self.error_at("unterminated string", start)),
                    }
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn hex4(&mut self, escape_at: usize) -> ParseResult<u32> {
        let rest = self.rest();
        let digits = rest.get(..4).filter(|d| d.chars().all(|c| c.is_ascii_hexdigit()));
        match digits {
            Some(d) => {
                self.pos += 4;
                u32::from_str_radix(d, 16)
                    .map_err(|_| self.error_at("invalid unicode escape", escape_at))
            }
            None => Err(self.error_at("invalid unicode escape", escape_at)),
        }
    }

    fn unicode_escape(&mut self, escape_at: usize) -> ParseResult<char> {
        let high = self.hex4(escape_at)?;
        let code = if (0xD800..0xDC00).contains(&high) {
            if !self.rest().starts_with("\\u") {
                return Err(self.error_at("unpaired surrogate in unicode escape", escape_at));
            }
            self.pos += 2;
            let low = self.hex4(escape_at)?;
            if !(0xDC00..0xE000).contains(&low) {
                return Err(self.error_at("unpaired surrogate in unicode escape", escape_at));
            }
            0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00)
        } else {
            high
        };
        char::from_u32(code).ok_or_else(|| self.error_at("invalid unicode escape", escape_at))
    }

    fn number(&mut self) -> ParseResult<Bson> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
            if self.rest().starts_with("Infinity") {
                self.pos += "Infinity".len();
                return Ok(Bson::Double(f64::NEG_INFINITY));
            }
        }

        let mut floating = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => {}
                '.' | 'e' | 'E' => floating = true,
                '+' | '-' if matches!(self.src[..self.pos].chars().last(), Some('e' | 'E')) => {}
                _ => break,
            }
            self.bump();
        }

        let text = &self.src[start..self.pos];
        if !floating {
            if let Ok(n) = text.parse::<i64>() {
                return Ok(match i32::try_from(n) {
                    Ok(small) => Bson::Int32(small),
                    Err(_) => Bson::Int64(n),
                });
            }
        }
        text.parse::<f64>()
            .map(Bson::Double)
            .map_err(|_| self.error_at(format!("invalid number '{}'", text), start))
    }

    fn identifier(&mut self) -> &'a str {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_ident_char(c)) {
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn literal(&mut self) -> ParseResult<Bson> {
        let start = self.pos;
        let ident = self.identifier();
        match ident {
            "true" => Ok(Bson::Boolean(true)),
            "false" => Ok(Bson::Boolean(false)),
            "null" => Ok(Bson::Null),
            "NaN" => Ok(Bson::Double(f64::NAN)),
            "Infinity" => Ok(Bson::Double(f64::INFINITY)),
            "ObjectId" => self.object_id(start),
            "ISODate" => self.date_call(start),
            "new" => {
                self.skip_whitespace();
                let ctor_at = self.pos;
                match self.identifier() {
                    "Date" | "ISODate" => self.date_call(start),
                    other => Err(self.error_at(
                        format!("unsupported constructor 'new {}'", other),
                        ctor_at,
                    )),
                }
            }
            "NumberLong" => {
                let n = self.integer_call(start)?;
                Ok(Bson::Int64(n))
            }
            "NumberInt" => {
                let n = self.integer_call(start)?;
                i32::try_from(n)
                    .map(Bson::Int32)
                    .map_err(|_| self.error_at("NumberInt value out of range", start))
            }
            "NumberDecimal" => self.decimal_call(start),
            "BinData" => self.bin_data(start),
            other => Err(self.error_at(format!("unexpected identifier '{}'", other), start)),
        }
    }

    /// Arguments of a constructor call, parsed as ordinary values
    fn call_arguments(&mut self) -> ParseResult<Vec<Bson>> {
        self.expect('(')?;
        let mut args = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(')') {
                self.bump();
                return Ok(args);
            }
            args.push(self.value()?);
            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some(')') => return Ok(args),
                Some(c) => {
                    return Err(self.error_at(
                        format!("expected ',' or ')', found '{}'", c),
                        self.pos - c.len_utf8(),
                    ));
                }
                None => return Err(self.error("unterminated argument list")),
            }
        }
    }

    fn object_id(&mut self, start: usize) -> ParseResult<Bson> {
        match self.call_arguments()?.as_slice() {
            [] => Ok(Bson::ObjectId(ObjectId::new())),
            [Bson::String(hex)] => ObjectId::parse_str(hex)
                .map(Bson::ObjectId)
                .map_err(|_| self.error_at(format!("invalid ObjectId '{}'", hex), start)),
            _ => Err(self.error_at("ObjectId expects one hex string", start)),
        }
    }

    fn date_call(&mut self, start: usize) -> ParseResult<Bson> {
        let millis = match self.call_arguments()?.as_slice() {
            [] => Utc::now().timestamp_millis(),
            [Bson::String(text)] => parse_date_text(text)
                .ok_or_else(|| self.error_at(format!("invalid date '{}'", text), start))?,
            [Bson::Int32(n)] => i64::from(*n),
            [Bson::Int64(n)] => *n,
            [Bson::Double(n)] if n.is_finite() => *n as i64,
            _ => return Err(self.error_at("date expects a string or milliseconds", start)),
        };
        Ok(Bson::DateTime(bson::DateTime::from_millis(millis)))
    }

    fn integer_call(&mut self, start: usize) -> ParseResult<i64> {
        match self.call_arguments()?.as_slice() {
            [Bson::Int32(n)] => Ok(i64::from(*n)),
            [Bson::Int64(n)] => Ok(*n),
            [Bson::String(text)] => text
                .trim()
                .parse::<i64>()
                .map_err(|_| self.error_at(format!("invalid integer '{}'", text), start)),
            _ => Err(self.error_at("expected one integer argument", start)),
        }
    }

    fn decimal_call(&mut self, start: usize) -> ParseResult<Bson> {
        let text = match self.call_arguments()?.as_slice() {
            [Bson::String(text)] => text.clone(),
            [Bson::Int32(n)] => n.to_string(),
            [Bson::Int64(n)] => n.to_string(),
            [Bson::Double(n)] => n.to_string(),
            _ => return Err(self.error_at("NumberDecimal expects one argument", start)),
        };
        Bson::try_from(serde_json::json!({ "$numberDecimal": text }))
            .map_err(|_| self.error_at(format!("invalid decimal '{}'", text), start))
    }

    fn bin_data(&mut self, start: usize) -> ParseResult<Bson> {
        let (subtype, encoded) = match self.call_arguments()?.as_slice() {
            [Bson::Int32(subtype), Bson::String(encoded)] => (*subtype, encoded.clone()),
            _ => {
                return Err(
                    self.error_at("BinData expects a subtype and a base64 string", start)
                );
            }
        };
        let subtype = u8::try_from(subtype)
            .map_err(|_| self.error_at("BinData subtype out of range", start))?;
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| self.error_at(format!("invalid base64: {}", e), start))?;
        Ok(Bson::Binary(Binary {
            subtype: BinarySubtype::from(subtype),
            bytes,
        }))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn is_extjson_wrapper(doc: &Document) -> bool {
    let keys: Vec<&str> = doc.keys().map(String::as_str).collect();
    match keys.as_slice() {
        [key] => WRAPPER_KEYS.contains(key),
        [a, b] => {
            let mut pair = [*a, *b];
            pair.sort_unstable();
            pair == ["$code", "$scope"] || pair == ["$binary", "$type"]
        }
        _ => false,
    }
}

/// RFC 3339 instant, or a bare `YYYY-MM-DD` taken as midnight UTC
fn parse_date_text(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Some(instant.timestamp_millis());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}
