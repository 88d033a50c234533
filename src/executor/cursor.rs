//! Element cursor over the target collection
//!
//! Hands out one deserialized element at a time. The type filter is applied
//! on the element's first byte, so filtered elements are skipped without
//! decoding. Elements that do not fit `S` are counted and skipped; anything
//! else the reader reports aborts the query.

use serde::de::DeserializeOwned;

use super::result::ExecutionStats;
use crate::errors::{QueryError, QueryResult};
use crate::observability::{log_event_with_fields, Event};
use crate::reader::{AsyncJsonTokenReader, JsonKind, Peeked, Token, TokenReader};
use tokio::io::AsyncRead;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// Reader sits inside the array; elements until `]`
    Array,
    /// One value at the reader position
    Single,
    /// Nothing selected
    Empty,
}

/// What to do with the value at the reader position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorAction {
    /// Consume the closing `]` and stop
    Close,
    /// Collection exhausted, nothing to consume
    Finish,
    SkipFiltered,
    Read,
}

/// Position inside the collection being iterated
#[derive(Debug)]
pub(crate) struct CollectionCursor {
    shape: Shape,
    done: bool,
}

impl CollectionCursor {
    /// Cursor over the value at the reader position.
    ///
    /// An array is entered and iterated; any other value is a one-element
    /// collection.
    pub(crate) fn open<T: TokenReader>(reader: &mut T) -> QueryResult<Self> {
        match reader.peek()? {
            Peeked::ValueStart(JsonKind::Array) => {
                reader.next_token()?;
                Ok(Self::array())
            }
            Peeked::ValueStart(_) => Ok(Self::single()),
            other => Err(unexpected(reader.bytes_read(), other)),
        }
    }

    pub(crate) async fn open_async<R: AsyncRead + Unpin>(
        reader: &mut AsyncJsonTokenReader<R>,
    ) -> QueryResult<Self> {
        match reader.peek().await? {
            Peeked::ValueStart(JsonKind::Array) => {
                reader.next_token().await?;
                Ok(Self::array())
            }
            Peeked::ValueStart(_) => Ok(Self::single()),
            other => Err(unexpected(reader.bytes_read(), other)),
        }
    }

    /// Cursor for a reader already positioned after `[`
    pub(crate) fn array() -> Self {
        Self {
            shape: Shape::Array,
            done: false,
        }
    }

    fn single() -> Self {
        Self {
            shape: Shape::Single,
            done: false,
        }
    }

    pub(crate) fn empty() -> Self {
        Self {
            shape: Shape::Empty,
            done: true,
        }
    }

    /// Whether the whole collection has been consumed
    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    fn decide(
        &mut self,
        peeked: Peeked,
        filter: Option<JsonKind>,
        stats: &mut ExecutionStats,
        offset: u64,
    ) -> QueryResult<CursorAction> {
        if self.done {
            return Ok(CursorAction::Finish);
        }
        let kind = match (self.shape, peeked) {
            (Shape::Empty, _) => {
                self.done = true;
                return Ok(CursorAction::Finish);
            }
            (Shape::Array, Peeked::EndArray) => {
                self.done = true;
                return Ok(CursorAction::Close);
            }
            (_, Peeked::ValueStart(kind)) => kind,
            (_, other) => return Err(unexpected(offset, other)),
        };

        if self.shape == Shape::Single {
            self.done = true;
        }
        stats.elements_read += 1;

        match filter {
            Some(wanted) if wanted != kind => {
                stats.elements_filtered_by_kind += 1;
                Ok(CursorAction::SkipFiltered)
            }
            _ => Ok(CursorAction::Read),
        }
    }

    /// Next element that fits `S`, or `None` once the collection is exhausted
    pub(crate) fn next<T: TokenReader, S: DeserializeOwned>(
        &mut self,
        reader: &mut T,
        filter: Option<JsonKind>,
        stats: &mut ExecutionStats,
    ) -> QueryResult<Option<S>> {
        loop {
            if self.done {
                return Ok(None);
            }
            let peeked = reader.peek()?;
            match self.decide(peeked, filter, stats, reader.bytes_read())? {
                CursorAction::Finish => return Ok(None),
                CursorAction::Close => {
                    expect_end_array(reader.next_token()?, reader.bytes_read())?;
                    return Ok(None);
                }
                CursorAction::SkipFiltered => reader.skip_value()?,
                CursorAction::Read => {
                    if let Some(element) = absorb(reader.read_value::<S>(), stats)? {
                        return Ok(Some(element));
                    }
                }
            }
        }
    }

    pub(crate) async fn next_async<R: AsyncRead + Unpin, S: DeserializeOwned>(
        &mut self,
        reader: &mut AsyncJsonTokenReader<R>,
        filter: Option<JsonKind>,
        stats: &mut ExecutionStats,
    ) -> QueryResult<Option<S>> {
        loop {
            if self.done {
                return Ok(None);
            }
            let peeked = reader.peek().await?;
            match self.decide(peeked, filter, stats, reader.bytes_read())? {
                CursorAction::Finish => return Ok(None),
                CursorAction::Close => {
                    expect_end_array(reader.next_token().await?, reader.bytes_read())?;
                    return Ok(None);
                }
                CursorAction::SkipFiltered => reader.skip_value().await?,
                CursorAction::Read => {
                    if let Some(element) = absorb(reader.read_value::<S>().await, stats)? {
                        return Ok(Some(element));
                    }
                }
            }
        }
    }
}

/// Recoverable errors skip the element; fatal ones propagate
pub(crate) fn absorb<S>(result: QueryResult<S>, stats: &mut ExecutionStats) -> QueryResult<Option<S>> {
    match result {
        Ok(element) => Ok(Some(element)),
        Err(err) if err.is_recoverable() => {
            stats.elements_malformed += 1;
            let reason = err.to_string();
            log_event_with_fields(
                Event::ElementSkipped,
                &[("code", err.code()), ("reason", reason.as_str())],
            );
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn expect_end_array(token: Option<Token>, offset: u64) -> QueryResult<()> {
    match token {
        Some(Token::EndArray) => Ok(()),
        other => Err(QueryError::document_parse(
            offset,
            format!("expected end of array, found {:?}", other),
        )),
    }
}

fn unexpected(offset: u64, peeked: Peeked) -> QueryError {
    QueryError::document_parse(offset, format!("expected a value, found {:?}", peeked))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::JsonTokenReader;
    use serde::Deserialize;
    use std::io::Cursor;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: u32,
    }

    fn reader(input: &str) -> JsonTokenReader<Cursor<Vec<u8>>> {
        JsonTokenReader::new(Cursor::new(input.as_bytes().to_vec()))
    }

    fn drain(input: &str, filter: Option<JsonKind>) -> (Vec<Item>, ExecutionStats) {
        let mut r = reader(input);
        let mut cursor = CollectionCursor::open(&mut r).unwrap();
        let mut stats = ExecutionStats::default();
        let mut items = Vec::new();
        while let Some(item) = cursor.next::<_, Item>(&mut r, filter, &mut stats).unwrap() {
            items.push(item);
        }
        assert!(cursor.is_done());
        assert_eq!(r.next_token().unwrap(), None);
        (items, stats)
    }

    #[test]
    fn test_array_elements() {
        let (items, stats) = drain(r#"[{"id": 1}, {"id": 2}]"#, None);
        assert_eq!(items, vec![Item { id: 1 }, Item { id: 2 }]);
        assert_eq!(stats.elements_read, 2);
    }

    #[test]
    fn test_single_value_is_one_element() {
        let (items, stats) = drain(r#"{"id": 7}"#, None);
        assert_eq!(items, vec![Item { id: 7 }]);
        assert_eq!(stats.elements_read, 1);
    }

    #[test]
    fn test_malformed_elements_are_skipped() {
        let (items, stats) = drain(r#"[{"id": 1}, {"id": "x"}, 5, {"id": 3}]"#, None);
        assert_eq!(items, vec![Item { id: 1 }, Item { id: 3 }]);
        assert_eq!(stats.elements_malformed, 2);
        assert_eq!(stats.elements_read, 4);
    }

    #[test]
    fn test_type_filter_skips_without_decoding() {
        let (items, stats) = drain(r#"[1, {"id": 1}, "s", [2], {"id": 2}]"#, Some(JsonKind::Object));
        assert_eq!(items.len(), 2);
        assert_eq!(stats.elements_filtered_by_kind, 3);
        assert_eq!(stats.elements_malformed, 0);
    }

    #[test]
    fn test_empty_cursor() {
        let mut r = reader("[1]");
        let mut cursor = CollectionCursor::empty();
        let mut stats = ExecutionStats::default();
        let next = cursor.next::<_, u32>(&mut r, None, &mut stats).unwrap();
        assert_eq!(next, None);
        assert_eq!(stats.elements_read, 0);
    }

    #[test]
    fn test_broken_document_is_fatal() {
        let mut r = reader(r#"[{"id": 1}, {"id": 2"#);
        let mut cursor = CollectionCursor::open(&mut r).unwrap();
        let mut stats = ExecutionStats::default();
        assert!(cursor.next::<_, Item>(&mut r, None, &mut stats).unwrap().is_some());
        let err = cursor.next::<_, Item>(&mut r, None, &mut stats).unwrap_err();
        assert_eq!(err.code(), "AERO_DOCUMENT_PARSE");
    }
}
