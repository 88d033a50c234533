//! Path-filtered executor
//!
//! Same contract as [`StreamingExecutor`], but the collection is reached
//! through a path expression classified once at construction:
//!
//! - literal segments, optionally ending in `[*]`: navigated on the token
//!   stream, then streamed with early termination
//! - a wildcard before the last segment: branches collected depth-first
//!   into a buffer
//! - advanced syntax: the whole document is parsed and handed to the
//!   injected [`PathEvaluator`](crate::path::PathEvaluator)
//!
//! A property that cannot be found on the token stream falls back to a tree
//! re-read when the source is rewindable. Forward-only sources have already
//! been consumed and yield nothing.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::cancel::CancellationToken;
use super::cursor::CollectionCursor;
use super::result::{ExecutionResult, ExecutionRoute, ExecutionStats, QueryOutput};
use super::streaming::{check_cancelled, drain, release, StreamingExecutor};
use super::ExecutionContext;
use crate::errors::{QueryError, QueryResult};
use crate::observability::{log_event_with_fields, warn_event, Event};
use crate::path::{tree, ClassifiedPath, PathSegment};
use crate::plan::QueryPlan;
use crate::reader::{
    AsyncJsonTokenReader, BytesSource, DocumentSource, JsonKind, Peeked, Token, TokenReader,
};

/// Result of walking property segments on the token stream
enum Navigation {
    Found(CollectionCursor),
    /// Name of the segment that could not be matched
    NotFound(String),
}

/// Executes plans against the collection selected by a path
pub struct PathFilteredExecutor<'a, S, R = S> {
    inner: StreamingExecutor<'a, S, R>,
    ctx: &'a ExecutionContext,
    path: ClassifiedPath,
}

impl<'a, S: DeserializeOwned, R: Clone> PathFilteredExecutor<'a, S, R> {
    /// Classifies `expression` and binds the executor to it
    pub fn new(
        plan: &'a QueryPlan<S, R>,
        ctx: &'a ExecutionContext,
        expression: &str,
    ) -> QueryResult<Self> {
        let path = ClassifiedPath::classify(expression)?;
        log_event_with_fields(
            Event::PathClassified,
            &[("path", path.expression()), ("kind", path.kind().as_str())],
        );

        if path.is_advanced() && ctx.evaluator.is_none() {
            return Err(QueryError::invalid_path(
                expression,
                "advanced syntax requires an injected path evaluator",
            ));
        }

        Ok(Self {
            inner: StreamingExecutor::new(plan, ctx),
            ctx,
            path,
        })
    }

    pub fn path(&self) -> &ClassifiedPath {
        &self.path
    }

    /// Runs the plan over the collection the path selects in `source`
    pub fn execute<D: DocumentSource>(&self, source: &mut D) -> QueryResult<ExecutionResult<R>> {
        let mut stats = ExecutionStats::default();
        let result = self.route(source, &mut stats);
        self.ctx.conclude(result, stats)
    }

    /// Async variant over a forward-only stream
    ///
    /// Direct paths are navigated and streamed without buffering. Other
    /// paths read the remaining bytes first and then take the in-memory
    /// route.
    pub async fn execute_async<T: AsyncRead + Unpin>(
        &self,
        stream: T,
        cancel: &CancellationToken,
    ) -> QueryResult<ExecutionResult<R>> {
        let mut stats = ExecutionStats::default();
        let result = self.route_async(stream, cancel, &mut stats).await;
        self.ctx.conclude(result, stats)
    }

    fn route<D: DocumentSource>(
        &self,
        source: &mut D,
        stats: &mut ExecutionStats,
    ) -> QueryResult<QueryOutput<R>> {
        let mut reader = self.ctx.reader(source.open()?);

        if self.path.is_advanced() {
            stats.route = ExecutionRoute::AdvancedEvaluation;
            let document = parse_tree(&mut reader);
            stats.bytes_read = reader.bytes_read();
            release(reader, stats);
            let nodes = self.evaluate_advanced(&document?)?;
            return self.inner.run_values(nodes, stats);
        }

        if self.path.wildcard_before_terminal() {
            stats.route = ExecutionRoute::BranchCollection;
            log_event_with_fields(Event::PathBranchCollection, &[("path", self.path.expression())]);
            let mut nodes = Vec::new();
            let collected = collect(&mut reader, self.path.segments(), &mut nodes, stats)
                .and_then(|()| drain(&mut reader));
            stats.bytes_read = reader.bytes_read();
            release(reader, stats);
            collected?;
            return self.inner.run_values(nodes, stats);
        }

        stats.route = ExecutionRoute::PathNavigation;
        let result = match navigate(&mut reader, self.path.segments()) {
            Ok(Navigation::Found(cursor)) => self.inner.run_sync(&mut reader, cursor, stats).map(Ok),
            Ok(Navigation::NotFound(missing)) => Ok(Err(missing)),
            Err(err) => Err(err),
        };
        stats.bytes_read = reader.bytes_read();
        release(reader, stats);

        match result? {
            Ok(output) => Ok(output),
            Err(missing) => self.fall_back(Some(source), &missing, stats),
        }
    }

    async fn route_async<T: AsyncRead + Unpin>(
        &self,
        stream: T,
        cancel: &CancellationToken,
        stats: &mut ExecutionStats,
    ) -> QueryResult<QueryOutput<R>> {
        check_cancelled(cancel)?;

        if !self.path.is_direct() {
            let mut stream = stream;
            let mut bytes = Vec::new();
            stream.read_to_end(&mut bytes).await?;
            check_cancelled(cancel)?;
            let mut source = BytesSource::new(bytes);
            return self.route(&mut source, stats);
        }

        stats.route = ExecutionRoute::PathNavigation;
        let mut reader = self.ctx.async_reader(stream);
        let result = match navigate_async(&mut reader, self.path.segments()).await {
            Ok(Navigation::Found(cursor)) => self
                .inner
                .run_async(&mut reader, cursor, cancel, stats)
                .await
                .map(Ok),
            Ok(Navigation::NotFound(missing)) => Ok(Err(missing)),
            Err(err) => Err(err),
        };
        stats.bytes_read = reader.bytes_read();
        release(reader, stats);

        match result? {
            Ok(output) => Ok(output),
            Err(missing) => self.fall_back(None::<&mut BytesSource>, &missing, stats),
        }
    }

    fn evaluate_advanced(&self, document: &Value) -> QueryResult<Vec<Value>> {
        let evaluator = self.ctx.evaluator.as_ref().ok_or_else(|| {
            QueryError::invalid_path(
                self.path.expression(),
                "advanced syntax requires an injected path evaluator",
            )
        })?;
        log_event_with_fields(Event::AdvancedPathDelegated, &[("path", self.path.expression())]);
        evaluator.evaluate(document, self.path.expression())
    }

    /// Resolves the path on a tree re-read, or selects nothing when the
    /// source cannot be read again
    fn fall_back<D: DocumentSource>(
        &self,
        source: Option<&mut D>,
        missing: &str,
        stats: &mut ExecutionStats,
    ) -> QueryResult<QueryOutput<R>> {
        stats.fallback_used = true;
        self.ctx.metrics.increment_path_fallbacks();

        let source = match source {
            Some(source) if source.is_rewindable() && self.ctx.config.allow_tree_fallback => source,
            _ => {
                warn_event(
                    Event::PathFallback,
                    &[
                        ("path", self.path.expression()),
                        ("missing", missing),
                        ("route", "forward_only"),
                    ],
                );
                stats.route = ExecutionRoute::ForwardOnlyFallback;
                return self.inner.run_values(Vec::new(), stats);
            }
        };

        let described = source.describe();
        warn_event(
            Event::PathFallback,
            &[
                ("path", self.path.expression()),
                ("missing", missing),
                ("route", "tree"),
                ("source", described.as_str()),
            ],
        );
        stats.route = ExecutionRoute::TreeFallback;

        let mut reader = self.ctx.reader(source.open()?);
        let document = parse_tree(&mut reader);
        stats.bytes_read += reader.bytes_read();
        release(reader, stats);
        let document = document?;

        let nodes = match &self.ctx.evaluator {
            Some(evaluator) => tree::into_collection(
                evaluator.evaluate(&document, self.path.expression())?,
                self.path.kind(),
            ),
            None => tree::resolve(&document, &self.path),
        };
        self.inner.run_values(nodes, stats)
    }
}

/// Parses the whole document into a tree; any syntax error is fatal
fn parse_tree<T: TokenReader>(reader: &mut T) -> QueryResult<Value> {
    let document = reader.read_value::<Value>()?;
    drain(reader)?;
    Ok(document)
}

fn unexpected_token(offset: u64, token: Option<Token>) -> QueryError {
    QueryError::document_parse(offset, format!("unexpected token {:?} inside object", token))
}

/// Walks property segments to the target collection.
///
/// Members are matched case-insensitively, first match in document order.
fn navigate<T: TokenReader>(reader: &mut T, segments: &[PathSegment]) -> QueryResult<Navigation> {
    for segment in segments {
        let PathSegment::Property(name) = segment else {
            // only ever the last segment on this route
            return match reader.peek()? {
                Peeked::ValueStart(JsonKind::Array) => {
                    reader.next_token()?;
                    Ok(Navigation::Found(CollectionCursor::array()))
                }
                _ => Ok(Navigation::Found(CollectionCursor::empty())),
            };
        };

        if reader.peek()? != Peeked::ValueStart(JsonKind::Object) {
            return Ok(Navigation::NotFound(name.clone()));
        }
        reader.next_token()?;

        loop {
            match reader.next_token()? {
                Some(Token::PropertyName(member)) if segment.matches_name(&member) => break,
                Some(Token::PropertyName(_)) => reader.skip_value()?,
                Some(Token::EndObject) => return Ok(Navigation::NotFound(name.clone())),
                other => return Err(unexpected_token(reader.bytes_read(), other)),
            }
        }
    }

    Ok(Navigation::Found(CollectionCursor::open(reader)?))
}

async fn navigate_async<T: AsyncRead + Unpin>(
    reader: &mut AsyncJsonTokenReader<T>,
    segments: &[PathSegment],
) -> QueryResult<Navigation> {
    for segment in segments {
        let PathSegment::Property(name) = segment else {
            return match reader.peek().await? {
                Peeked::ValueStart(JsonKind::Array) => {
                    reader.next_token().await?;
                    Ok(Navigation::Found(CollectionCursor::array()))
                }
                _ => Ok(Navigation::Found(CollectionCursor::empty())),
            };
        };

        if reader.peek().await? != Peeked::ValueStart(JsonKind::Object) {
            return Ok(Navigation::NotFound(name.clone()));
        }
        reader.next_token().await?;

        loop {
            match reader.next_token().await? {
                Some(Token::PropertyName(member)) if segment.matches_name(&member) => break,
                Some(Token::PropertyName(_)) => reader.skip_value().await?,
                Some(Token::EndObject) => return Ok(Navigation::NotFound(name.clone())),
                other => return Err(unexpected_token(reader.bytes_read(), other)),
            }
        }
    }

    Ok(Navigation::Found(CollectionCursor::open_async(reader).await?))
}

/// Depth-first collection of every node `segments` selects, in document order.
///
/// Nodes of the wrong shape for the next segment are skipped and counted.
fn collect<T: TokenReader>(
    reader: &mut T,
    segments: &[PathSegment],
    out: &mut Vec<Value>,
    stats: &mut ExecutionStats,
) -> QueryResult<()> {
    let Some((segment, rest)) = segments.split_first() else {
        out.push(reader.read_value::<Value>()?);
        return Ok(());
    };

    match (segment, reader.peek()?) {
        (PathSegment::Wildcard, Peeked::ValueStart(JsonKind::Array)) => {
            reader.next_token()?;
            while reader.peek()? != Peeked::EndArray {
                collect(reader, rest, out, stats)?;
            }
            reader.next_token()?;
        }
        (PathSegment::Property(_), Peeked::ValueStart(JsonKind::Object)) => {
            reader.next_token()?;
            let mut matched = false;
            loop {
                match reader.next_token()? {
                    Some(Token::PropertyName(member)) if !matched && segment.matches_name(&member) => {
                        matched = true;
                        collect(reader, rest, out, stats)?;
                    }
                    Some(Token::PropertyName(_)) => reader.skip_value()?,
                    Some(Token::EndObject) => break,
                    other => return Err(unexpected_token(reader.bytes_read(), other)),
                }
            }
        }
        _ => {
            stats.branches_skipped += 1;
            reader.skip_value()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathEvaluator;
    use crate::reader::StreamSource;
    use serde::Deserialize;
    use serde_json::json;
    use std::io::Cursor;
    use std::sync::Arc;

    #[derive(Debug, Clone, Deserialize, PartialEq)]
    struct Item {
        id: u32,
    }

    const DOC: &str = r#"{
        "meta": {"count": 3, "tags": ["a", "b"]},
        "Data": [{"id": 1}, {"id": 2}, {"id": 3}],
        "groups": [
            {"items": [{"id": 10}, {"id": 11}]},
            "not-a-group",
            {"other": []},
            {"items": [{"id": 12}]}
        ]
    }"#;

    fn ids(result: ExecutionResult<Item>) -> Vec<u32> {
        result.into_sequence().unwrap().into_iter().map(|i| i.id).collect()
    }

    fn run(expr: &str, plan: &QueryPlan<Item>) -> ExecutionResult<Item> {
        let ctx = ExecutionContext::default();
        PathFilteredExecutor::new(plan, &ctx, expr)
            .unwrap()
            .execute(&mut BytesSource::from(DOC))
            .unwrap()
    }

    #[test]
    fn test_terminal_wildcard_navigates_case_insensitively() {
        let plan = QueryPlan::<Item>::builder().build().unwrap();
        let result = run("$.data[*]", &plan);
        assert_eq!(result.stats.route, ExecutionRoute::PathNavigation);
        assert_eq!(ids(result), vec![1, 2, 3]);
    }

    #[test]
    fn test_basic_path_unwraps_target_array() {
        let plan = QueryPlan::<Item>::builder().filter(|i| i.id > 1).build().unwrap();
        assert_eq!(ids(run("$['Data']", &plan)), vec![2, 3]);
    }

    #[test]
    fn test_basic_path_to_object_is_single_element() {
        let ctx = ExecutionContext::default();
        let plan = QueryPlan::<Value>::builder().build().unwrap();
        let result = PathFilteredExecutor::new(&plan, &ctx, "$.meta")
            .unwrap()
            .execute(&mut BytesSource::from(DOC))
            .unwrap();
        assert_eq!(
            result.into_sequence().unwrap(),
            vec![json!({"count": 3, "tags": ["a", "b"]})]
        );
    }

    #[test]
    fn test_take_terminates_early_on_path() {
        let plan = QueryPlan::<Item>::builder().take(1).build().unwrap();
        let result = run("$.Data[*]", &plan);
        assert!(result.stats.early_terminated);
        assert_eq!(result.stats.elements_read, 1);
        assert_eq!(ids(result), vec![1]);
    }

    #[test]
    fn test_terminal_wildcard_over_object_selects_nothing() {
        let plan = QueryPlan::<Item>::builder().build().unwrap();
        let result = run("$.meta[*]", &plan);
        assert!(result.is_empty());
        assert!(!result.stats.fallback_used);
    }

    #[test]
    fn test_branch_collection_skips_scalar_branches() {
        let plan = QueryPlan::<Item>::builder().build().unwrap();
        let result = run("$.groups[*].items[*]", &plan);
        assert_eq!(result.stats.route, ExecutionRoute::BranchCollection);
        assert_eq!(result.stats.branches_skipped, 1);
        assert_eq!(ids(result), vec![10, 11, 12]);
    }

    #[test]
    fn test_missing_member_falls_back_to_tree() {
        let plan = QueryPlan::<Item>::builder().build().unwrap();
        let result = run("$.missing[*]", &plan);
        assert_eq!(result.stats.route, ExecutionRoute::TreeFallback);
        assert!(result.stats.fallback_used);
        assert!(result.is_empty());
    }

    #[test]
    fn test_forward_only_source_yields_nothing_on_miss() {
        let ctx = ExecutionContext::default();
        let plan = QueryPlan::<Item>::builder().build().unwrap();
        let mut source = StreamSource::new(Cursor::new(DOC.as_bytes().to_vec()));
        let result = PathFilteredExecutor::new(&plan, &ctx, "$.missing")
            .unwrap()
            .execute(&mut source)
            .unwrap();
        assert_eq!(result.stats.route, ExecutionRoute::ForwardOnlyFallback);
        assert!(result.is_empty());
        assert_eq!(ctx.metrics.snapshot().path_fallbacks, 1);
    }

    #[test]
    fn test_advanced_path_needs_evaluator() {
        let ctx = ExecutionContext::default();
        let plan = QueryPlan::<Item>::builder().build().unwrap();
        let err = PathFilteredExecutor::new(&plan, &ctx, "$..id").err().unwrap();
        assert_eq!(err.code(), "AERO_INVALID_PATH");
    }

    struct FixedEvaluator;

    impl PathEvaluator for FixedEvaluator {
        fn evaluate(&self, document: &Value, _expression: &str) -> QueryResult<Vec<Value>> {
            Ok(document["Data"].as_array().cloned().unwrap_or_default())
        }
    }

    #[test]
    fn test_advanced_path_is_delegated() {
        let ctx = ExecutionContext::default().with_evaluator(Arc::new(FixedEvaluator));
        let plan = QueryPlan::<Item>::builder().skip(1).build().unwrap();
        let result = PathFilteredExecutor::new(&plan, &ctx, "$.Data[?(@.id > 0)]")
            .unwrap()
            .execute(&mut BytesSource::from(DOC))
            .unwrap();
        assert_eq!(result.stats.route, ExecutionRoute::AdvancedEvaluation);
        assert_eq!(ids(result), vec![2, 3]);
    }

    #[test]
    fn test_broken_document_is_fatal() {
        let ctx = ExecutionContext::default();
        let plan = QueryPlan::<Item>::builder().build().unwrap();
        let err = PathFilteredExecutor::new(&plan, &ctx, "$.data[*]")
            .unwrap()
            .execute(&mut BytesSource::from(r#"{"data": [{"id": 1}, {"id": 2}"#))
            .unwrap_err();
        assert_eq!(err.code(), "AERO_DOCUMENT_PARSE");
    }

    #[tokio::test]
    async fn test_async_direct_path() {
        let ctx = ExecutionContext::default();
        let plan = QueryPlan::<Item>::builder().take(2).build().unwrap();
        let result = PathFilteredExecutor::new(&plan, &ctx, "$.Data[*]")
            .unwrap()
            .execute_async(DOC.as_bytes(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ids(result), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_async_branch_collection_buffers() {
        let ctx = ExecutionContext::default();
        let plan = QueryPlan::<Item>::builder().build().unwrap();
        let result = PathFilteredExecutor::new(&plan, &ctx, "$.groups[*].items[*]")
            .unwrap()
            .execute_async(DOC.as_bytes(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.stats.route, ExecutionRoute::BranchCollection);
        assert_eq!(ids(result), vec![10, 11, 12]);
    }
}
