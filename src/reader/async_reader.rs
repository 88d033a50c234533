//! Suspending token reader over `tokio::io::AsyncRead`
//!
//! Same lexer and semantics as `JsonTokenReader`; each refill may suspend.

use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::lexer::{Lexer, Step};
use super::pool::BufferPool;
use super::{decode_element, Peeked, Token};
use crate::config::ExecutorConfig;
use crate::errors::{QueryError, QueryResult};

/// Async counterpart of [`JsonTokenReader`](super::JsonTokenReader)
pub struct AsyncJsonTokenReader<R> {
    source: R,
    lexer: Lexer,
    chunk: Vec<u8>,
    bytes_read: u64,
    pool: BufferPool,
}

impl<R: AsyncRead + Unpin> AsyncJsonTokenReader<R> {
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

    async fn fill(&mut self) -> QueryResult<()> {
        if self.lexer.is_finished() {
            return Err(QueryError::document_parse(
                self.lexer.position(),
                "unexpected end of input",
            ));
        }
        let n = self.source.read(&mut self.chunk).await?;
        if n == 0 {
            self.lexer.finish();
        } else {
            self.lexer.feed(&self.chunk[..n]);
            self.bytes_read += n as u64;
        }
        Ok(())
    }

    pub async fn next_token(&mut self) -> QueryResult<Option<Token>> {
        loop {
            match self.lexer.next_token()? {
                Step::Ready(token) => return Ok(token),
                Step::NeedMore => self.fill().await?,
            }
        }
    }

    pub async fn peek(&mut self) -> QueryResult<Peeked> {
        loop {
            match self.lexer.peek()? {
                Step::Ready(peeked) => return Ok(peeked),
                Step::NeedMore => self.fill().await?,
            }
        }
    }

    pub async fn read_value<T: DeserializeOwned>(&mut self) -> QueryResult<T> {
        let mut captured = self.pool.acquire();
        loop {
            match self.lexer.scan_value(Some(&mut *captured))? {
                Step::Ready(()) => break,
                Step::NeedMore => self.fill().await?,
            }
        }
        decode_element(&captured, self.lexer.value_start())
    }

    pub async fn skip_value(&mut self) -> QueryResult<()> {
        loop {
            match self.lexer.scan_value(None)? {
                Step::Ready(()) => return Ok(()),
                Step::NeedMore => self.fill().await?,
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.lexer.depth()
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}
