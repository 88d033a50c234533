//! Document sources
//!
//! A source hands out byte streams. Rewindable sources can be opened again,
//! which the path executor uses for its tree fallback; forward-only sources
//! open exactly once.

use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{QueryError, QueryResult};

/// Supplier of document bytes
pub trait DocumentSource {
    type Stream: Read;

    /// Opens a stream positioned at the start of the document
    fn open(&mut self) -> QueryResult<Self::Stream>;

    /// Whether `open` may be called again after a stream was consumed
    fn is_rewindable(&self) -> bool;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// In-memory document
#[derive(Debug, Clone)]
pub struct BytesSource {
    bytes: Arc<[u8]>,
}

impl BytesSource {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self {
            bytes: Arc::from(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<&str> for BytesSource {
    fn from(text: &str) -> Self {
        Self::new(text.as_bytes())
    }
}

impl From<String> for BytesSource {
    fn from(text: String) -> Self {
        Self::new(text.into_bytes())
    }
}

impl DocumentSource for BytesSource {
    type Stream = Cursor<Arc<[u8]>>;

    fn open(&mut self) -> QueryResult<Self::Stream> {
        Ok(Cursor::new(Arc::clone(&self.bytes)))
    }

    fn is_rewindable(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("bytes({})", self.bytes.len())
    }
}

/// Document stored in a file; reopened for every pass
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DocumentSource for FileSource {
    type Stream = File;

    fn open(&mut self) -> QueryResult<File> {
        Ok(File::open(&self.path)?)
    }

    fn is_rewindable(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("file({})", self.path.display())
    }
}

/// Forward-only stream, e.g. a socket or pipe
pub struct StreamSource<R> {
    stream: Option<R>,
}

impl<R: Read> StreamSource<R> {
    pub fn new(stream: R) -> Self {
        Self {
            stream: Some(stream),
        }
    }
}

impl<R: Read> DocumentSource for StreamSource<R> {
    type Stream = R;

    fn open(&mut self) -> QueryResult<R> {
        self.stream.take().ok_or_else(|| {
            QueryError::Io(io::Error::new(
                io::ErrorKind::Other,
                "forward-only stream already consumed",
            ))
        })
    }

    fn is_rewindable(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        "stream".to_string()
    }
}
