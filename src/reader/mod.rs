//! Token-level document reading
//!
//! The executors see documents only through [`TokenReader`]: structural
//! tokens, a one-token lookahead, and sub-tree decode/skip. The bundled
//! readers share one sans-IO lexer; the blocking and async wrappers differ
//! only in how they wait for more bytes.

mod async_reader;
mod lexer;
mod pool;
mod source;
mod sync_reader;

use std::fmt;

use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{QueryError, QueryResult};

pub use async_reader::AsyncJsonTokenReader;
pub use pool::{BufferPool, PoolStats, PooledBuffer};
pub use source::{BytesSource, DocumentSource, FileSource, StreamSource};
pub use sync_reader::JsonTokenReader;

/// JSON kind of a value, known from its first byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonKind {
    Object,
    Array,
    String,
    Number,
    Bool,
    Null,
}

impl JsonKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JsonKind::Object => "object",
            JsonKind::Array => "array",
            JsonKind::String => "string",
            JsonKind::Number => "number",
            JsonKind::Bool => "bool",
            JsonKind::Null => "null",
        }
    }

    /// Kind of an already parsed value
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Object(_) => JsonKind::Object,
            Value::Array(_) => JsonKind::Array,
            Value::String(_) => JsonKind::String,
            Value::Number(_) => JsonKind::Number,
            Value::Bool(_) => JsonKind::Bool,
            Value::Null => JsonKind::Null,
        }
    }

    /// Kind of the value starting with `byte`
    pub(crate) fn from_first_byte(byte: u8) -> Option<Self> {
        match byte {
            b'{' => Some(JsonKind::Object),
            b'[' => Some(JsonKind::Array),
            b'"' => Some(JsonKind::String),
            b'-' | b'0'..=b'9' => Some(JsonKind::Number),
            b't' | b'f' => Some(JsonKind::Bool),
            b'n' => Some(JsonKind::Null),
            _ => None,
        }
    }
}

impl fmt::Display for JsonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structural token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    StartObject,
    EndObject,
    StartArray,
    EndArray,
    PropertyName(String),
    Scalar(Value),
}

/// What the next token will be, without consuming it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peeked {
    ValueStart(JsonKind),
    PropertyName,
    EndObject,
    EndArray,
    EndOfDocument,
}

/// Forward-only structural access to one document
pub trait TokenReader {
    /// Next structural token, `None` once the document is complete
    fn next_token(&mut self) -> QueryResult<Option<Token>>;

    /// Looks at the next token without consuming it
    fn peek(&mut self) -> QueryResult<Peeked>;

    /// Deserializes the whole value at the current position.
    ///
    /// The value is consumed even when it does not fit `T`, so a shape
    /// mismatch leaves the reader usable.
    fn read_value<T: DeserializeOwned>(&mut self) -> QueryResult<T>;

    /// Consumes the value at the current position without decoding it
    fn skip_value(&mut self) -> QueryResult<()>;

    /// Current container nesting
    fn depth(&self) -> usize;

    /// Bytes pulled from the underlying source so far
    fn bytes_read(&self) -> u64;
}

/// Decodes one captured element.
///
/// serde reports a type mismatch before it finishes parsing, so a failed
/// decode is only a shape error once the bytes are known to be valid JSON.
pub(crate) fn decode_element<T: DeserializeOwned>(bytes: &[u8], offset: u64) -> QueryResult<T> {
    serde_json::from_slice(bytes).map_err(|err| {
        match serde_json::from_slice::<IgnoredAny>(bytes) {
            Ok(_) => QueryError::from_element_error(offset, err),
            Err(syntax) => QueryError::document_parse(offset, syntax.to_string()),
        }
    })
}
