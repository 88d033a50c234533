//! Incremental JSON lexer
//!
//! Sans-IO: callers `feed` bytes and `finish` at end of input. Every
//! operation either completes or reports `NeedMore` without committing a
//! partial token, so it can simply be retried after the next feed.
//!
//! Skipping and capturing a whole value is the exception: a value can be far
//! larger than one chunk, so the value scanner consumes input as it goes and
//! keeps its own state between calls.

use serde::de::IgnoredAny;
use serde_json::Value;

use super::{JsonKind, Peeked, Token};
use crate::errors::{QueryError, QueryResult};

/// Outcome of one lexer operation
#[derive(Debug)]
pub(crate) enum Step<T> {
    Ready(T),
    NeedMore,
}

macro_rules! ready {
    ($step:expr) => {
        match $step {
            Step::Ready(value) => value,
            Step::NeedMore => return Ok(Step::NeedMore),
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Value,
    ValueOrEnd,
    KeyOrEnd,
    Key,
    Colon,
    CommaOrEnd,
    Done,
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

fn is_delimiter(b: u8) -> bool {
    is_whitespace(b) || matches!(b, b',' | b':' | b'[' | b']' | b'{' | b'}' | b'"')
}

fn describe(b: u8) -> String {
    if b.is_ascii_graphic() {
        format!("'{}'", b as char)
    } else {
        format!("byte 0x{:02x}", b)
    }
}

/// Progress through a string token that spans input chunks
#[derive(Debug, Clone, Copy)]
struct StringScan {
    /// Absolute offset of the opening quote
    start: u64,
    /// Bytes from the quote already examined
    checked: usize,
    escaped: bool,
}

#[derive(Debug)]
pub(crate) struct Lexer {
    buf: Vec<u8>,
    pos: usize,
    /// Absolute offset of `buf[0]`
    offset: u64,
    eof: bool,
    stack: Vec<Container>,
    expect: Expect,
    max_depth: usize,
    scanner: Option<ValueScanner>,
    string_scan: Option<StringScan>,
    value_start: u64,
}

impl Lexer {
    pub(crate) fn new(max_depth: usize) -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            offset: 0,
            eof: false,
            stack: Vec::new(),
            expect: Expect::Value,
            max_depth,
            scanner: None,
            string_scan: None,
            value_start: 0,
        }
    }

    /// Appends input, dropping what has already been consumed
    pub(crate) fn feed(&mut self, data: &[u8]) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.offset += self.pos as u64;
            self.pos = 0;
        }
        self.buf.extend_from_slice(data);
    }

    /// Marks the end of input
    pub(crate) fn finish(&mut self) {
        self.eof = true;
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.eof
    }

    pub(crate) fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Absolute offset of the next unconsumed byte
    pub(crate) fn position(&self) -> u64 {
        self.offset + self.pos as u64
    }

    /// Offset where the last skipped or captured value started
    pub(crate) fn value_start(&self) -> u64 {
        self.value_start
    }

    fn error(&self, reason: impl Into<String>) -> QueryError {
        QueryError::document_parse(self.position(), reason)
    }

    fn unexpected(&self, b: u8, expected: &str) -> QueryError {
        self.error(format!("unexpected {}, expected {}", describe(b), expected))
    }

    fn end_of_input(&self) -> QueryResult<()> {
        match self.expect {
            Expect::Done => Ok(()),
            Expect::Value if self.stack.is_empty() && self.position() == 0 => {
                Err(self.error("empty document"))
            }
            _ => Err(self.error("unexpected end of input")),
        }
    }

    fn after_value(&mut self) {
        self.expect = if self.stack.is_empty() {
            Expect::Done
        } else {
            Expect::CommaOrEnd
        };
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.buf.len() && is_whitespace(self.buf[self.pos]) {
            self.pos += 1;
        }
    }

    /// Consumes whitespace and separators up to the first byte of the next token.
    ///
    /// `Ready(None)` means the input is exhausted.
    fn advance_to_token(&mut self) -> QueryResult<Step<Option<u8>>> {
        loop {
            self.skip_whitespace();
            let Some(&b) = self.buf.get(self.pos) else {
                return Ok(if self.eof {
                    Step::Ready(None)
                } else {
                    Step::NeedMore
                });
            };

            match self.expect {
                Expect::Colon => {
                    if b != b':' {
                        return Err(self.unexpected(b, "':'"));
                    }
                    self.pos += 1;
                    self.expect = Expect::Value;
                }
                Expect::CommaOrEnd if b == b',' => {
                    self.pos += 1;
                    self.expect = match self.stack.last() {
                        Some(Container::Object) => Expect::Key,
                        _ => Expect::Value,
                    };
                }
                _ => return Ok(Step::Ready(Some(b))),
            }
        }
    }

    pub(crate) fn next_token(&mut self) -> QueryResult<Step<Option<Token>>> {
        if self.scanner.is_some() {
            return Err(self.error("token requested while a value is half consumed"));
        }
        let b = match ready!(self.advance_to_token()?) {
            Some(b) => b,
            None => {
                self.end_of_input()?;
                return Ok(Step::Ready(None));
            }
        };

        let token = match (self.expect, b) {
            (Expect::Done, _) => return Err(self.error("unexpected data after the root value")),
            (Expect::KeyOrEnd, b'}') | (Expect::CommaOrEnd, b'}') => {
                self.close(Container::Object, b)?
            }
            (Expect::ValueOrEnd, b']') | (Expect::CommaOrEnd, b']') => {
                self.close(Container::Array, b)?
            }
            (Expect::KeyOrEnd, b'"') | (Expect::Key, b'"') => {
                let end = ready!(self.string_end()?);
                let name: String = serde_json::from_slice(&self.buf[self.pos..end])
                    .map_err(|e| self.error(format!("invalid property name: {}", e)))?;
                self.pos = end;
                self.expect = Expect::Colon;
                Token::PropertyName(name)
            }
            (Expect::KeyOrEnd, _) | (Expect::Key, _) => {
                return Err(self.unexpected(b, "a property name"))
            }
            (Expect::CommaOrEnd, _) => return Err(self.unexpected(b, "',' or a closing bracket")),
            (Expect::Value, _) | (Expect::ValueOrEnd, _) => ready!(self.value_token(b)?),
            (Expect::Colon, _) => return Err(self.unexpected(b, "':'")),
        };
        Ok(Step::Ready(Some(token)))
    }

    pub(crate) fn peek(&mut self) -> QueryResult<Step<Peeked>> {
        if self.scanner.is_some() {
            return Err(self.error("peek requested while a value is half consumed"));
        }
        let b = match ready!(self.advance_to_token()?) {
            Some(b) => b,
            None => {
                self.end_of_input()?;
                return Ok(Step::Ready(Peeked::EndOfDocument));
            }
        };

        let peeked = match (self.expect, b) {
            (Expect::Done, _) => return Err(self.error("unexpected data after the root value")),
            (Expect::KeyOrEnd, b'}') | (Expect::CommaOrEnd, b'}') => Peeked::EndObject,
            (Expect::ValueOrEnd, b']') | (Expect::CommaOrEnd, b']') => Peeked::EndArray,
            (Expect::KeyOrEnd, b'"') | (Expect::Key, b'"') => Peeked::PropertyName,
            (Expect::Value, _) | (Expect::ValueOrEnd, _) => match JsonKind::from_first_byte(b) {
                Some(kind) => Peeked::ValueStart(kind),
                None => return Err(self.unexpected(b, "a value")),
            },
            (Expect::KeyOrEnd, _) | (Expect::Key, _) => {
                return Err(self.unexpected(b, "a property name"))
            }
            (Expect::CommaOrEnd, _) => return Err(self.unexpected(b, "',' or a closing bracket")),
            (Expect::Colon, _) => return Err(self.unexpected(b, "':'")),
        };
        Ok(Step::Ready(peeked))
    }

    fn close(&mut self, container: Container, b: u8) -> QueryResult<Token> {
        if self.stack.last() != Some(&container) {
            return Err(self.unexpected(b, "a matching closing bracket"));
        }
        self.stack.pop();
        self.pos += 1;
        self.after_value();
        Ok(match container {
            Container::Object => Token::EndObject,
            Container::Array => Token::EndArray,
        })
    }

    fn open(&mut self, container: Container) -> QueryResult<Token> {
        if self.stack.len() >= self.max_depth {
            return Err(self.error(format!("nesting deeper than {}", self.max_depth)));
        }
        self.stack.push(container);
        self.pos += 1;
        Ok(match container {
            Container::Object => {
                self.expect = Expect::KeyOrEnd;
                Token::StartObject
            }
            Container::Array => {
                self.expect = Expect::ValueOrEnd;
                Token::StartArray
            }
        })
    }

    fn value_token(&mut self, b: u8) -> QueryResult<Step<Token>> {
        let end = match b {
            b'{' => return self.open(Container::Object).map(Step::Ready),
            b'[' => return self.open(Container::Array).map(Step::Ready),
            b'"' => ready!(self.string_end()?),
            _ if JsonKind::from_first_byte(b).is_some() => ready!(self.bare_end()),
            _ => return Err(self.unexpected(b, "a value")),
        };

        let value: Value = serde_json::from_slice(&self.buf[self.pos..end])
            .map_err(|e| self.error(format!("invalid scalar: {}", e)))?;
        self.pos = end;
        self.after_value();
        Ok(Step::Ready(Token::Scalar(value)))
    }

    /// End (exclusive) of the string starting at `pos`.
    ///
    /// Progress is kept across `NeedMore` so a long string split over many
    /// chunks is scanned once.
    fn string_end(&mut self) -> QueryResult<Step<usize>> {
        let start = self.position();
        let mut scan = match self.string_scan.take() {
            Some(scan) if scan.start == start => scan,
            _ => StringScan {
                start,
                checked: 1,
                escaped: false,
            },
        };

        while let Some(&c) = self.buf.get(self.pos + scan.checked) {
            scan.checked += 1;
            if scan.escaped {
                scan.escaped = false;
            } else if c == b'\\' {
                scan.escaped = true;
            } else if c == b'"' {
                return Ok(Step::Ready(self.pos + scan.checked));
            }
        }
        if self.eof {
            Err(self.error("unterminated string"))
        } else {
            self.string_scan = Some(scan);
            Ok(Step::NeedMore)
        }
    }

    /// End (exclusive) of the number or literal starting at `pos`
    fn bare_end(&self) -> Step<usize> {
        match self.buf[self.pos..].iter().position(|&c| is_delimiter(c)) {
            Some(len) => Step::Ready(self.pos + len),
            None if self.eof => Step::Ready(self.buf.len()),
            None => Step::NeedMore,
        }
    }

    /// Consumes the value at the current position, appending its bytes to
    /// `sink` when one is given.
    ///
    /// May consume input across several `NeedMore` rounds; callers must pass
    /// the same sink until `Ready`.
    pub(crate) fn scan_value(&mut self, mut sink: Option<&mut Vec<u8>>) -> QueryResult<Step<()>> {
        if self.scanner.is_none() {
            let b = match ready!(self.advance_to_token()?) {
                Some(b) => b,
                None => {
                    self.end_of_input()?;
                    return Err(self.error("expected a value, found end of document"));
                }
            };
            if !matches!(self.expect, Expect::Value | Expect::ValueOrEnd)
                || JsonKind::from_first_byte(b).is_none()
            {
                return Err(self.unexpected(b, "a value"));
            }
            self.value_start = self.position();
            self.scanner = Some(ValueScanner::new(self.stack.len(), self.max_depth));
        }

        let outcome = match self.scanner.as_mut() {
            Some(scanner) => scanner.advance(&self.buf[self.pos..], self.eof),
            None => Ok((0, true)),
        };
        let (consumed, done) = match outcome {
            Ok(outcome) => outcome,
            Err(reason) => {
                self.scanner = None;
                return Err(self.error(reason));
            }
        };

        if let Some(out) = sink.as_mut() {
            out.extend_from_slice(&self.buf[self.pos..self.pos + consumed]);
        }
        self.pos += consumed;

        if done {
            self.scanner = None;
            self.after_value();
            Ok(Step::Ready(()))
        } else if self.eof {
            self.scanner = None;
            Err(self.error("unexpected end of input inside a value"))
        } else {
            Ok(Step::NeedMore)
        }
    }
}

/// Lexical state of the token the scanner is inside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inside {
    Between,
    String { key: bool },
    Escape { key: bool },
    Unicode { key: bool, remaining: u8 },
    Bare,
}

/// Validates one value being skipped or captured across input chunks.
///
/// Runs the same grammar as the token path, so a skipped sub-tree is
/// rejected exactly when reading it token by token would be.
#[derive(Debug)]
struct ValueScanner {
    stack: Vec<Container>,
    expect: Expect,
    inside: Inside,
    literal: Vec<u8>,
    base_depth: usize,
    max_depth: usize,
}

impl ValueScanner {
    fn new(base_depth: usize, max_depth: usize) -> Self {
        Self {
            stack: Vec::new(),
            expect: Expect::Value,
            inside: Inside::Between,
            literal: Vec::new(),
            base_depth,
            max_depth,
        }
    }

    fn value_done(&mut self) {
        self.expect = if self.stack.is_empty() {
            Expect::Done
        } else {
            Expect::CommaOrEnd
        };
    }

    fn close(&mut self, container: Container, b: u8) -> Result<(), String> {
        if self.stack.pop() != Some(container) {
            return Err(format!("unexpected {}, expected a matching closing bracket", describe(b)));
        }
        self.value_done();
        Ok(())
    }

    fn finish_literal(&mut self) -> Result<(), String> {
        let checked = serde_json::from_slice::<IgnoredAny>(&self.literal)
            .map_err(|e| format!("invalid scalar: {}", e));
        self.literal.clear();
        self.inside = Inside::Between;
        checked?;
        self.value_done();
        Ok(())
    }

    fn string_byte(&mut self, b: u8, key: bool) -> Result<(), String> {
        match b {
            b'\\' => self.inside = Inside::Escape { key },
            b'"' => {
                self.inside = Inside::Between;
                if key {
                    self.expect = Expect::Colon;
                } else {
                    self.value_done();
                }
            }
            0x00..=0x1f => return Err(format!("control character {} in string", describe(b))),
            _ => {}
        }
        Ok(())
    }

    fn structural_byte(&mut self, b: u8) -> Result<(), String> {
        match (self.expect, b) {
            (Expect::Value, b'{') | (Expect::ValueOrEnd, b'{') => {
                self.stack.push(Container::Object);
                self.expect = Expect::KeyOrEnd;
            }
            (Expect::Value, b'[') | (Expect::ValueOrEnd, b'[') => {
                self.stack.push(Container::Array);
                self.expect = Expect::ValueOrEnd;
            }
            (Expect::Value, b'"') | (Expect::ValueOrEnd, b'"') => {
                self.inside = Inside::String { key: false }
            }
            (Expect::ValueOrEnd, b']') | (Expect::CommaOrEnd, b']') => {
                self.close(Container::Array, b)?
            }
            (Expect::KeyOrEnd, b'}') | (Expect::CommaOrEnd, b'}') => {
                self.close(Container::Object, b)?
            }
            (Expect::Value, _) | (Expect::ValueOrEnd, _) => {
                if JsonKind::from_first_byte(b).is_none() {
                    return Err(format!("unexpected {}, expected a value", describe(b)));
                }
                self.inside = Inside::Bare;
                self.literal.push(b);
            }
            (Expect::KeyOrEnd, b'"') | (Expect::Key, b'"') => {
                self.inside = Inside::String { key: true }
            }
            (Expect::KeyOrEnd, _) | (Expect::Key, _) => {
                return Err(format!("unexpected {}, expected a property name", describe(b)))
            }
            (Expect::Colon, b':') => self.expect = Expect::Value,
            (Expect::Colon, _) => return Err(format!("unexpected {}, expected ':'", describe(b))),
            (Expect::CommaOrEnd, b',') => {
                self.expect = match self.stack.last() {
                    Some(Container::Object) => Expect::Key,
                    _ => Expect::Value,
                };
            }
            (Expect::CommaOrEnd, _) => {
                return Err(format!(
                    "unexpected {}, expected ',' or a closing bracket",
                    describe(b)
                ))
            }
            (Expect::Done, _) => return Err(format!("unexpected {} after the value", describe(b))),
        }
        if self.base_depth + self.stack.len() > self.max_depth {
            return Err(format!("nesting deeper than {}", self.max_depth));
        }
        Ok(())
    }

    /// Returns the bytes consumed and whether the value is complete
    fn advance(&mut self, input: &[u8], eof: bool) -> Result<(usize, bool), String> {
        for (i, &b) in input.iter().enumerate() {
            match self.inside {
                Inside::String { key } => self.string_byte(b, key)?,
                Inside::Escape { key } => {
                    self.inside = match b {
                        b'"' | b'\\' | b'/' | b'b' | b'f' | b'n' | b'r' | b't' => {
                            Inside::String { key }
                        }
                        b'u' => Inside::Unicode { key, remaining: 4 },
                        _ => return Err(format!("invalid escape {}", describe(b))),
                    };
                }
                Inside::Unicode { key, remaining } => {
                    if !b.is_ascii_hexdigit() {
                        return Err(format!("invalid unicode escape {}", describe(b)));
                    }
                    self.inside = if remaining > 1 {
                        Inside::Unicode { key, remaining: remaining - 1 }
                    } else {
                        Inside::String { key }
                    };
                }
                Inside::Bare if !is_delimiter(b) => self.literal.push(b),
                Inside::Bare => {
                    self.finish_literal()?;
                    // the delimiter belongs to the enclosing value
                    if self.expect == Expect::Done {
                        return Ok((i, true));
                    }
                    if !is_whitespace(b) {
                        self.structural_byte(b)?;
                    }
                }
                Inside::Between if is_whitespace(b) => {}
                Inside::Between => self.structural_byte(b)?,
            }
            if self.expect == Expect::Done {
                return Ok((i + 1, true));
            }
        }

        if eof && self.inside == Inside::Bare {
            self.finish_literal()?;
        }
        Ok((input.len(), self.expect == Expect::Done))
    }
}
