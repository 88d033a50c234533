//! Blocking token reader over `std::io::Read`

use std::io::{ErrorKind, Read};

use serde::de::DeserializeOwned;

use super::lexer::{Lexer, Step};
use super::pool::BufferPool;
use super::{decode_element, Peeked, Token, TokenReader};
use crate::config::ExecutorConfig;
use crate::errors::{QueryError, QueryResult};

/// Reads structural tokens from a byte stream, one chunk at a time
pub struct JsonTokenReader<R> {
    source: R,
    lexer: Lexer,
    chunk: Vec<u8>,
    bytes_read: u64,
    pool: BufferPool,
}

impl<R: Read> JsonTokenReader<R> {
    /// Reader with default configuration and a private pool
    pub fn new(source: R) -> Self {
        Self::with_config(source, &ExecutorConfig::default(), BufferPool::default())
    }

    pub fn with_config(source: R, config: &ExecutorConfig, pool: BufferPool) -> Self {
        Self {
            source,
            lexer: Lexer::new(config.max_depth),
            chunk: vec![0; config.read_chunk_size.max(1)],
            bytes_read: 0,
            pool,
        }
    }

    fn fill(&mut self) -> QueryResult<()> {
        if self.lexer.is_finished() {
            return Err(QueryError::document_parse(
                self.lexer.position(),
                "unexpected end of input",
            ));
        }
        loop {
            match self.source.read(&mut self.chunk) {
                Ok(0) => {
                    self.lexer.finish();
                    return Ok(());
                }
                Ok(n) => {
                    self.lexer.feed(&self.chunk[..n]);
                    self.bytes_read += n as u64;
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(QueryError::Io(e)),
            }
        }
    }

    fn drive<T>(
        &mut self,
        mut op: impl FnMut(&mut Lexer) -> QueryResult<Step<T>>,
    ) -> QueryResult<T> {
        loop {
            match op(&mut self.lexer)? {
                Step::Ready(value) => return Ok(value),
                Step::NeedMore => self.fill()?,
            }
        }
    }
}

impl<R: Read> TokenReader for JsonTokenReader<R> {
    fn next_token(&mut self) -> QueryResult<Option<Token>> {
        self.drive(|lexer| lexer.next_token())
    }

    fn peek(&mut self) -> QueryResult<Peeked> {
        self.drive(|lexer| lexer.peek())
    }

    fn read_value<T: DeserializeOwned>(&mut self) -> QueryResult<T> {
        let mut captured = self.pool.acquire();
        self.drive(|lexer| lexer.scan_value(Some(&mut *captured)))?;
        decode_element(&captured, self.lexer.value_start())
    }

    fn skip_value(&mut self) -> QueryResult<()> {
        self.drive(|lexer| lexer.scan_value(None))
    }

    fn depth(&self) -> usize {
        self.lexer.depth()
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}
