//! Streaming executor
//!
//! Evaluates a plan against the root collection of a document in one
//! forward pass. A root array's elements are the collection; any other root
//! value is a one-element collection.
//!
//! Reading stops the moment no later element can change the result (take
//! exhausted, take-while failed, quantifier decided). The reader is dropped
//! at the end of every call, early or not.

use std::io::Read;

use futures_util::stream::{self, Stream};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::AsyncRead;

use super::cancel::CancellationToken;
use super::cursor::{absorb, CollectionCursor};
use super::operations::OperationExecutor;
use super::pipeline::{Admit, ElementPipeline, StreamDriver};
use super::result::{ExecutionResult, ExecutionStats, QueryOutput};
use super::ExecutionContext;
use crate::errors::{QueryError, QueryResult};
use crate::observability::{log_event_with_fields, Event};
use crate::plan::QueryPlan;
use crate::reader::{AsyncJsonTokenReader, JsonKind, JsonTokenReader, TokenReader};

/// Executes plans against the root collection of a document
pub struct StreamingExecutor<'a, S, R = S> {
    plan: &'a QueryPlan<S, R>,
    ctx: &'a ExecutionContext,
}

impl<'a, S, R> Clone for StreamingExecutor<'a, S, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, S, R> Copy for StreamingExecutor<'a, S, R> {}

impl<'a, S: DeserializeOwned, R: Clone> StreamingExecutor<'a, S, R> {
    pub fn new(plan: &'a QueryPlan<S, R>, ctx: &'a ExecutionContext) -> Self {
        Self { plan, ctx }
    }

    /// Runs the plan to completion over a blocking reader
    pub fn execute<T: Read>(&self, reader: JsonTokenReader<T>) -> QueryResult<ExecutionResult<R>> {
        let mut reader = reader;
        let mut stats = ExecutionStats::default();

        let result = CollectionCursor::open(&mut reader)
            .and_then(|cursor| self.run_sync(&mut reader, cursor, &mut stats));

        stats.bytes_read = reader.bytes_read();
        release(reader, &stats);
        self.ctx.conclude(result, stats)
    }

    /// Runs the plan over an async reader, checking `cancel` before every element
    pub async fn execute_async<T: AsyncRead + Unpin>(
        &self,
        reader: AsyncJsonTokenReader<T>,
        cancel: &CancellationToken,
    ) -> QueryResult<ExecutionResult<R>> {
        let mut reader = reader;
        let mut stats = ExecutionStats::default();

        let result = match check_cancelled(cancel) {
            Ok(()) => match CollectionCursor::open_async(&mut reader).await {
                Ok(cursor) => self.run_async(&mut reader, cursor, cancel, &mut stats).await,
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        };

        stats.bytes_read = reader.bytes_read();
        release(reader, &stats);
        self.ctx.conclude(result, stats)
    }

    /// Lazy, pull-based results.
    ///
    /// Only plans producing a plain sequence can be streamed. Plans that need
    /// a global view are evaluated when the stream is created and then
    /// drained from memory.
    pub fn stream<T: Read>(&self, reader: JsonTokenReader<T>) -> QueryResult<ResultStream<'a, T, S, R>> {
        self.ensure_sequence()?;

        if !self.plan.streams_inline() {
            let result = self.execute(reader)?;
            let stats = result.stats.clone();
            let items = result.into_sequence().unwrap_or_default();
            return Ok(ResultStream {
                executor: *self,
                reader: None,
                cursor: CollectionCursor::empty(),
                pipeline: ElementPipeline::new(self.plan),
                buffered: Some(items.into_iter()),
                stats,
            });
        }

        let mut reader = reader;
        let cursor = match CollectionCursor::open(&mut reader) {
            Ok(cursor) => cursor,
            Err(err) => {
                self.ctx.record_failure(&err);
                return Err(err);
            }
        };

        Ok(ResultStream {
            executor: *self,
            reader: Some(reader),
            cursor,
            pipeline: ElementPipeline::new(self.plan),
            buffered: None,
            stats: ExecutionStats::default(),
        })
    }

    /// Async counterpart of [`stream`](Self::stream)
    ///
    /// Cancellation surfaces as one `Cancelled` item, after which the stream
    /// ends.
    pub fn stream_async<T>(
        &self,
        reader: AsyncJsonTokenReader<T>,
        cancel: &CancellationToken,
    ) -> QueryResult<impl Stream<Item = QueryResult<R>> + 'a>
    where
        T: AsyncRead + Unpin + 'a,
        S: 'a,
        R: 'a,
    {
        self.ensure_sequence()?;

        let state = AsyncStreamState {
            executor: *self,
            reader: Some(reader),
            cursor: None,
            pipeline: ElementPipeline::new(self.plan),
            buffered: None,
            stats: ExecutionStats::default(),
            cancel: cancel.clone(),
        };

        Ok(stream::unfold(state, |mut state| async move {
            let item = state.next_item().await?;
            Some((item, state))
        }))
    }

    fn ensure_sequence(&self) -> QueryResult<()> {
        if self.plan.yields_sequence() {
            return Ok(());
        }
        let produced = self.plan.terminal_name().unwrap_or("grouped output");
        Err(QueryError::invalid_plan(format!(
            "only sequence plans can be streamed lazily, got {}",
            produced
        )))
    }

    /// Drives a positioned cursor to the plan's output
    pub(crate) fn run_sync<T: TokenReader>(
        &self,
        reader: &mut T,
        mut cursor: CollectionCursor,
        stats: &mut ExecutionStats,
    ) -> QueryResult<QueryOutput<R>> {
        let filter = self.plan.type_filter;
        let output = self.consume(
            |stats: &mut ExecutionStats| cursor.next(&mut *reader, filter, stats),
            stats,
        )?;

        if cursor.is_done() {
            drain(reader)?;
        } else {
            self.terminated_early(stats);
        }
        Ok(output)
    }

    pub(crate) async fn run_async<T: AsyncRead + Unpin>(
        &self,
        reader: &mut AsyncJsonTokenReader<T>,
        mut cursor: CollectionCursor,
        cancel: &CancellationToken,
        stats: &mut ExecutionStats,
    ) -> QueryResult<QueryOutput<R>> {
        let filter = self.plan.type_filter;

        let output = if self.plan.streams_inline() {
            let mut driver = StreamDriver::new(self.plan);
            while driver.wants_more() {
                check_cancelled(cancel)?;
                match cursor.next_async(reader, filter, stats).await? {
                    Some(element) => driver.push(element, stats),
                    None => break,
                }
            }
            driver.finish()
        } else {
            let mut buffer = Vec::new();
            loop {
                check_cancelled(cancel)?;
                match cursor.next_async(reader, filter, stats).await? {
                    Some(element) => buffer.push(element),
                    None => break,
                }
            }
            self.materialize(buffer, stats)?
        };

        if cursor.is_done() {
            drain_async(reader).await?;
        } else {
            self.terminated_early(stats);
        }
        Ok(output)
    }

    /// Runs already parsed nodes through the same pipeline
    pub(crate) fn run_values(
        &self,
        values: Vec<Value>,
        stats: &mut ExecutionStats,
    ) -> QueryResult<QueryOutput<R>> {
        let filter = self.plan.type_filter;
        let mut values = values.into_iter();

        let output = self.consume(
            |stats: &mut ExecutionStats| {
                for value in values.by_ref() {
                    stats.elements_read += 1;
                    if let Some(kind) = filter {
                        if JsonKind::of(&value) != kind {
                            stats.elements_filtered_by_kind += 1;
                            continue;
                        }
                    }
                    let decoded = serde_json::from_value::<S>(value)
                        .map_err(|e| QueryError::from_element_error(0, e));
                    if let Some(element) = absorb(decoded, stats)? {
                        return Ok(Some(element));
                    }
                }
                Ok(None)
            },
            stats,
        )?;

        if !values.as_slice().is_empty() {
            self.terminated_early(stats);
        }
        Ok(output)
    }

    fn consume<F>(&self, mut next: F, stats: &mut ExecutionStats) -> QueryResult<QueryOutput<R>>
    where
        F: FnMut(&mut ExecutionStats) -> QueryResult<Option<S>>,
    {
        if self.plan.streams_inline() {
            let mut driver = StreamDriver::new(self.plan);
            while driver.wants_more() {
                match next(stats)? {
                    Some(element) => driver.push(element, stats),
                    None => break,
                }
            }
            return Ok(driver.finish());
        }

        let mut buffer = Vec::new();
        while let Some(element) = next(stats)? {
            buffer.push(element);
        }
        self.materialize(buffer, stats)
    }

    fn materialize(&self, buffer: Vec<S>, stats: &mut ExecutionStats) -> QueryResult<QueryOutput<R>> {
        stats.materialized = true;
        let count = buffer.len().to_string();
        log_event_with_fields(Event::Materialization, &[("elements", count.as_str())]);
        OperationExecutor::run(buffer, self.plan, stats)
    }

    fn terminated_early(&self, stats: &mut ExecutionStats) {
        stats.early_terminated = true;
        let read = stats.elements_read.to_string();
        let yielded = stats.elements_yielded.to_string();
        log_event_with_fields(
            Event::EarlyTermination,
            &[("elements_read", read.as_str()), ("yielded", yielded.as_str())],
        );
    }
}

pub(crate) fn check_cancelled(cancel: &CancellationToken) -> QueryResult<()> {
    if cancel.is_cancelled() {
        Err(QueryError::Cancelled)
    } else {
        Ok(())
    }
}

/// Reads the rest of the document so trailing garbage is reported
pub(crate) fn drain<T: TokenReader>(reader: &mut T) -> QueryResult<()> {
    while reader.next_token()?.is_some() {}
    Ok(())
}

pub(crate) async fn drain_async<T: AsyncRead + Unpin>(
    reader: &mut AsyncJsonTokenReader<T>,
) -> QueryResult<()> {
    while reader.next_token().await?.is_some() {}
    Ok(())
}

/// Drops the reader and logs how much of the source was consumed
pub(crate) fn release<T>(reader: T, stats: &ExecutionStats) {
    drop(reader);
    let bytes = stats.bytes_read.to_string();
    log_event_with_fields(
        Event::ReaderReleased,
        &[
            ("bytes_read", bytes.as_str()),
            ("early", if stats.early_terminated { "true" } else { "false" }),
        ],
    );
}

/// Pull-based result sequence over a blocking reader
///
/// The reader is released when the sequence ends, fails, or is dropped.
pub struct ResultStream<'a, T, S, R> {
    executor: StreamingExecutor<'a, S, R>,
    reader: Option<JsonTokenReader<T>>,
    cursor: CollectionCursor,
    pipeline: ElementPipeline<'a, S, R>,
    buffered: Option<std::vec::IntoIter<R>>,
    stats: ExecutionStats,
}

impl<'a, T: Read, S: DeserializeOwned, R: Clone> ResultStream<'a, T, S, R> {
    /// Counters so far; final once the iterator returned `None`
    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    fn advance(&mut self, reader: &mut JsonTokenReader<T>) -> QueryResult<Option<R>> {
        let filter = self.executor.plan.type_filter;
        loop {
            if self.pipeline.exhausted() {
                if self.cursor.is_done() {
                    drain(reader)?;
                } else {
                    self.executor.terminated_early(&mut self.stats);
                }
                return Ok(None);
            }
            match self.cursor.next(reader, filter, &mut self.stats)? {
                Some(element) => {
                    if let Admit::Yield(result) = self.pipeline.offer(element, &mut self.stats) {
                        return Ok(Some(result));
                    }
                }
                None => {
                    drain(reader)?;
                    return Ok(None);
                }
            }
        }
    }

    fn close(&mut self, reader: JsonTokenReader<T>, failure: Option<&QueryError>) {
        self.stats.bytes_read = reader.bytes_read();
        release(reader, &self.stats);
        match failure {
            Some(err) => self.executor.ctx.record_failure(err),
            None => self.executor.ctx.record(&self.stats),
        }
    }
}

impl<'a, T: Read, S: DeserializeOwned, R: Clone> Iterator for ResultStream<'a, T, S, R> {
    type Item = QueryResult<R>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(buffered) = self.buffered.as_mut() {
            return buffered.next().map(Ok);
        }

        let mut reader = self.reader.take()?;
        match self.advance(&mut reader) {
            Ok(Some(result)) => {
                self.reader = Some(reader);
                Some(Ok(result))
            }
            Ok(None) => {
                self.close(reader, None);
                None
            }
            Err(err) => {
                self.close(reader, Some(&err));
                Some(Err(err))
            }
        }
    }
}

struct AsyncStreamState<'a, T, S, R> {
    executor: StreamingExecutor<'a, S, R>,
    reader: Option<AsyncJsonTokenReader<T>>,
    cursor: Option<CollectionCursor>,
    pipeline: ElementPipeline<'a, S, R>,
    buffered: Option<std::vec::IntoIter<R>>,
    stats: ExecutionStats,
    cancel: CancellationToken,
}

impl<'a, T: AsyncRead + Unpin, S: DeserializeOwned, R: Clone> AsyncStreamState<'a, T, S, R> {
    async fn next_item(&mut self) -> Option<QueryResult<R>> {
        if let Some(buffered) = self.buffered.as_mut() {
            return buffered.next().map(Ok);
        }

        let mut reader = self.reader.take()?;
        match self.advance(&mut reader).await {
            Ok(Some(result)) if self.buffered.is_none() => {
                self.reader = Some(reader);
                Some(Ok(result))
            }
            Ok(Some(result)) => {
                self.close(reader, None);
                Some(Ok(result))
            }
            Ok(None) => {
                self.close(reader, None);
                None
            }
            Err(err) => {
                self.close(reader, Some(&err));
                Some(Err(err))
            }
        }
    }

    async fn advance(&mut self, reader: &mut AsyncJsonTokenReader<T>) -> QueryResult<Option<R>> {
        let executor = self.executor;
        let filter = executor.plan.type_filter;
        check_cancelled(&self.cancel)?;

        if self.cursor.is_none() {
            self.cursor = Some(CollectionCursor::open_async(reader).await?);
        }
        let cursor = match self.cursor.as_mut() {
            Some(cursor) => cursor,
            None => return Ok(None),
        };

        if !executor.plan.streams_inline() {
            let mut buffer = Vec::new();
            loop {
                check_cancelled(&self.cancel)?;
                match cursor.next_async(reader, filter, &mut self.stats).await? {
                    Some(element) => buffer.push(element),
                    None => break,
                }
            }
            drain_async(reader).await?;
            let output = executor.materialize(buffer, &mut self.stats)?;
            let mut items = output.into_sequence().unwrap_or_default().into_iter();
            let first = items.next();
            self.buffered = Some(items);
            return Ok(first);
        }

        loop {
            if self.pipeline.exhausted() {
                if cursor.is_done() {
                    drain_async(reader).await?;
                } else {
                    executor.terminated_early(&mut self.stats);
                }
                return Ok(None);
            }
            check_cancelled(&self.cancel)?;
            match cursor.next_async(reader, filter, &mut self.stats).await? {
                Some(element) => {
                    if let Admit::Yield(result) = self.pipeline.offer(element, &mut self.stats) {
                        return Ok(Some(result));
                    }
                }
                None => {
                    drain_async(reader).await?;
                    return Ok(None);
                }
            }
        }
    }

    fn close(&mut self, reader: AsyncJsonTokenReader<T>, failure: Option<&QueryError>) {
        self.stats.bytes_read = reader.bytes_read();
        release(reader, &self.stats);
        match failure {
            Some(err) => self.executor.ctx.record_failure(err),
            None => self.executor.ctx.record(&self.stats),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;
    use futures_util::StreamExt;
    use serde::Deserialize;
    use serde_json::json;
    use std::io::Cursor;

    #[derive(Debug, Clone, Deserialize, PartialEq)]
    struct Person {
        name: String,
        age: u32,
    }

    fn people_json(n: usize) -> String {
        let items: Vec<String> = (0..n)
            .map(|i| format!(r#"{{"name": "p{}", "age": {}}}"#, i, 20 + (i % 50)))
            .collect();
        format!("[{}]", items.join(", "))
    }

    fn context(chunk: usize) -> ExecutionContext {
        ExecutionContext::new(ExecutorConfig::default().with_read_chunk_size(chunk))
    }

    fn reader(ctx: &ExecutionContext, input: &str) -> JsonTokenReader<Cursor<Vec<u8>>> {
        ctx.reader(Cursor::new(input.as_bytes().to_vec()))
    }

    #[test]
    fn test_take_stops_reading() {
        let ctx = context(64);
        let input = people_json(1000);
        let plan = QueryPlan::<Person>::builder()
            .filter(|p| p.age >= 21)
            .take(3)
            .build()
            .unwrap();

        let result = StreamingExecutor::new(&plan, &ctx)
            .execute(reader(&ctx, &input))
            .unwrap();

        assert_eq!(result.len(), 3);
        assert!(result.stats.early_terminated);
        assert_eq!(result.stats.elements_read, 4);
        assert!(result.stats.bytes_read < input.len() as u64);
    }

    #[test]
    fn test_take_zero_reads_no_element() {
        let ctx = context(16);
        let plan = QueryPlan::<Person>::builder().take(0).build().unwrap();
        let result = StreamingExecutor::new(&plan, &ctx)
            .execute(reader(&ctx, &people_json(10)))
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(result.stats.elements_read, 0);
    }

    #[test]
    fn test_root_object_is_single_element() {
        let ctx = ExecutionContext::default();
        let plan = QueryPlan::<Person>::builder().build().unwrap();
        let result = StreamingExecutor::new(&plan, &ctx)
            .execute(reader(&ctx, r#"{"name": "solo", "age": 40}"#))
            .unwrap();
        assert_eq!(
            result.into_sequence().unwrap(),
            vec![Person { name: "solo".into(), age: 40 }]
        );
    }

    #[test]
    fn test_materialized_sort() {
        let ctx = ExecutionContext::default();
        let plan = QueryPlan::<Person>::builder()
            .order_by_descending(|p| p.age)
            .select(|p: Person| p.name)
            .take(2)
            .build()
            .unwrap();
        let input = r#"[{"name": "a", "age": 30}, {"name": "b", "age": 50}, {"name": "c", "age": 40}]"#;
        let result = StreamingExecutor::new(&plan, &ctx)
            .execute(reader(&ctx, input))
            .unwrap();
        assert!(result.stats.materialized);
        assert!(!result.stats.early_terminated);
        assert_eq!(result.into_sequence().unwrap(), vec!["b", "c"]);
    }

    #[test]
    fn test_trailing_garbage_is_fatal() {
        let ctx = ExecutionContext::default();
        let plan = QueryPlan::<Value>::builder().build().unwrap();
        let err = StreamingExecutor::new(&plan, &ctx)
            .execute(reader(&ctx, "[1, 2] 3"))
            .unwrap_err();
        assert_eq!(err.code(), "AERO_DOCUMENT_PARSE");
        assert_eq!(ctx.metrics.snapshot().queries_failed, 1);
    }

    #[test]
    fn test_inline_quantifier_short_circuits() {
        let ctx = context(32);
        let input = people_json(500);
        let plan = QueryPlan::<Person>::builder()
            .any_match(|p| p.name == "p2")
            .build()
            .unwrap();
        let result = StreamingExecutor::new(&plan, &ctx)
            .execute(reader(&ctx, &input))
            .unwrap();
        assert_eq!(result.output, QueryOutput::Boolean(true));
        assert_eq!(result.stats.elements_read, 3);
        assert!(!result.stats.materialized);
    }

    #[test]
    fn test_lazy_stream_pulls_on_demand() {
        let ctx = context(32);
        let input = people_json(200);
        let plan = QueryPlan::<Person>::builder()
            .select(|p: Person| p.age)
            .build()
            .unwrap();

        let mut stream = StreamingExecutor::new(&plan, &ctx)
            .stream(reader(&ctx, &input))
            .unwrap();
        assert_eq!(stream.next().unwrap().unwrap(), 20);
        assert_eq!(stream.next().unwrap().unwrap(), 21);
        assert_eq!(stream.stats().elements_read, 2);

        let rest: Vec<u32> = stream.by_ref().map(|r| r.unwrap()).collect();
        assert_eq!(rest.len(), 198);
        assert!(stream.next().is_none());
        assert_eq!(ctx.metrics.snapshot().queries_executed, 1);
    }

    #[test]
    fn test_lazy_stream_rejects_terminal_plans() {
        let ctx = ExecutionContext::default();
        let plan = QueryPlan::<Person>::builder().count().build().unwrap();
        let err = StreamingExecutor::new(&plan, &ctx)
            .stream(reader(&ctx, "[]"))
            .err()
            .unwrap();
        assert_eq!(err.code(), "AERO_INVALID_PLAN");
    }

    #[test]
    fn test_run_values_applies_type_filter() {
        let ctx = ExecutionContext::default();
        let plan = QueryPlan::<Value>::builder()
            .of_kind(JsonKind::Number)
            .build()
            .unwrap();
        let mut stats = ExecutionStats::default();
        let output = StreamingExecutor::new(&plan, &ctx)
            .run_values(vec![json!(1), json!("x"), json!(2)], &mut stats)
            .unwrap();
        assert_eq!(output.into_sequence().unwrap(), vec![json!(1), json!(2)]);
        assert_eq!(stats.elements_filtered_by_kind, 1);
    }

    #[tokio::test]
    async fn test_execute_async() {
        let ctx = context(16);
        let input = people_json(50);
        let plan = QueryPlan::<Person>::builder()
            .filter(|p| p.age % 2 == 0)
            .take(2)
            .build()
            .unwrap();
        let result = StreamingExecutor::new(&plan, &ctx)
            .execute_async(ctx.async_reader(input.as_bytes()), &CancellationToken::new())
            .await
            .unwrap();
        let names: Vec<String> = result
            .into_sequence()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["p0", "p2"]);
    }

    #[tokio::test]
    async fn test_execute_async_cancelled() {
        let ctx = ExecutionContext::default();
        let plan = QueryPlan::<Person>::builder().build().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let input = people_json(5);
        let err = StreamingExecutor::new(&plan, &ctx)
            .execute_async(ctx.async_reader(input.as_bytes()), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Cancelled));
        assert_eq!(ctx.metrics.snapshot().cancellations, 1);
    }

    #[tokio::test]
    async fn test_stream_async() {
        let ctx = context(16);
        let input = people_json(20);
        let plan = QueryPlan::<Person>::builder()
            .skip(5)
            .take(3)
            .select(|p: Person| p.name)
            .build()
            .unwrap();
        let cancel = CancellationToken::new();
        let executor = StreamingExecutor::new(&plan, &ctx);
        let names: Vec<String> = executor
            .stream_async(ctx.async_reader(input.as_bytes()), &cancel)
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(names, vec!["p5", "p6", "p7"]);
    }
}
